//! Build metadata exposed to key templates as `.Repo`, `.Commit` and `.Build`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Metadata {
    pub repo: Repo,
    pub commit: Commit,
    pub build: Build,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Repo {
    pub name: String,
    pub namespace: String,
    pub owner: String,
    pub branch: String,
    pub link: String,
    pub private: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Commit {
    pub sha: String,
    pub branch: String,
    #[serde(rename = "Ref")]
    pub reference: String,
    pub link: String,
    pub message: String,
    pub author: Author,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Build {
    pub number: u64,
    pub event: String,
    pub status: String,
    pub link: String,
    pub created: i64,
    pub started: i64,
}

impl Metadata {
    /// Reads metadata through `lookup`, trying `DRONE_*` variables before `CI_*` ones.
    ///
    /// Missing or unparsable values are left at their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| -> String {
            names
                .iter()
                .find_map(|name| lookup(*name).filter(|v| !v.is_empty()))
                .unwrap_or_default()
        };

        Metadata {
            repo: Repo {
                name: get(&["DRONE_REPO_NAME", "CI_REPO_NAME"]),
                namespace: get(&["DRONE_REPO_NAMESPACE", "CI_REPO_OWNER"]),
                owner: get(&["DRONE_REPO_OWNER", "CI_REPO_OWNER"]),
                branch: get(&["DRONE_REPO_BRANCH", "CI_REPO_DEFAULT_BRANCH"]),
                link: get(&["DRONE_REPO_LINK", "CI_REPO_LINK"]),
                private: get(&["DRONE_REPO_PRIVATE", "CI_REPO_PRIVATE"]) == "true",
            },
            commit: Commit {
                sha: get(&["DRONE_COMMIT_SHA", "CI_COMMIT_SHA"]),
                branch: get(&["DRONE_COMMIT_BRANCH", "CI_COMMIT_BRANCH"]),
                reference: get(&["DRONE_COMMIT_REF", "CI_COMMIT_REF"]),
                link: get(&["DRONE_COMMIT_LINK", "CI_COMMIT_LINK"]),
                message: get(&["DRONE_COMMIT_MESSAGE", "CI_COMMIT_MESSAGE"]),
                author: Author {
                    name: get(&["DRONE_COMMIT_AUTHOR", "CI_COMMIT_AUTHOR"]),
                    email: get(&["DRONE_COMMIT_AUTHOR_EMAIL", "CI_COMMIT_AUTHOR_EMAIL"]),
                },
            },
            build: Build {
                number: get(&["DRONE_BUILD_NUMBER", "CI_BUILD_NUMBER"])
                    .parse()
                    .unwrap_or_default(),
                event: get(&["DRONE_BUILD_EVENT", "CI_BUILD_EVENT"]),
                status: get(&["DRONE_BUILD_STATUS", "CI_BUILD_STATUS"]),
                link: get(&["DRONE_BUILD_LINK", "CI_BUILD_LINK"]),
                created: get(&["DRONE_BUILD_CREATED", "CI_BUILD_CREATED"])
                    .parse()
                    .unwrap_or_default(),
                started: get(&["DRONE_BUILD_STARTED", "CI_BUILD_STARTED"])
                    .parse()
                    .unwrap_or_default(),
            },
        }
    }

    /// Reads metadata from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
