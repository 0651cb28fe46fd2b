//! Command templates for the build, push and deploy collaborators
//!
//! The declarative `build`, `push`, `update_kubeconfig` and `apply` steps are
//! expanded into shell command templates here. Arguments are left
//! uninterpolated so `$NAME` tokens resolve at run time like any other shell
//! step. Arguments that are not plain words are single-quoted, which keeps
//! them one shell word without stopping interpolation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static PLAIN_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_@%+=:,./${}-]+$").unwrap());

/// Quote `arg` as a single shell word
fn quote(arg: &str) -> String {
    if PLAIN_WORD.is_match(arg) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Binary names of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub git: String,
    pub docker: String,
    pub kubectl: String,
    pub aws: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            docker: "docker".to_string(),
            kubectl: "kubectl".to_string(),
            aws: "aws".to_string(),
        }
    }
}

impl Tools {
    /// `docker build -t <image> [-f <dockerfile>] <context>`
    pub fn build(&self, image: &str, context: &str, dockerfile: Option<&str>) -> String {
        let (image, context) = (quote(image), quote(context));
        match dockerfile {
            Some(file) => format!(
                "{} build -t {} -f {} {}",
                self.docker,
                image,
                quote(file),
                context
            ),
            None => format!("{} build -t {} {}", self.docker, image, context),
        }
    }

    /// Tag the local image for the registry and push it
    pub fn push(&self, image: &str, tag: &str, registry: &str) -> String {
        let remote = quote(&format!("{}/{}:{}", registry.trim_end_matches('/'), image, tag));
        format!(
            "{docker} tag {image} {remote} && {docker} push {remote}",
            docker = self.docker,
            image = quote(image),
            remote = remote
        )
    }

    /// `aws eks update-kubeconfig --region <region> --name <cluster>`
    pub fn update_kubeconfig(&self, region: &str, cluster: &str) -> String {
        format!(
            "{} eks update-kubeconfig --region {} --name {}",
            self.aws,
            quote(region),
            quote(cluster)
        )
    }

    /// `kubectl apply -f <m1> -f <m2> ...`
    pub fn apply(&self, manifests: &[String]) -> String {
        let files: Vec<String> = manifests.iter().map(|m| format!("-f {}", quote(m))).collect();
        format!("{} apply {}", self.kubectl, files.join(" "))
    }
}
