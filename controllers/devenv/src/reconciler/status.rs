//! Status payload of a DevEnv.

use crds::DevEnvStatus;
use serde_json::{Map, Value, json};

/// Where the code volume is mounted inside the dev environment workload.
pub const REMOTE_CODE_DIR: &str = "/home/docker/code";

/// SSH address of the dev environment.
pub fn ssh_address(name: &str, base_domain: &str) -> String {
    format!("docker@{}.{}", name, base_domain)
}

/// One-liner that syncs the current directory into the dev environment and
/// reloads its services.
pub fn sync_command(ssh: &str, excluded_paths: &[String]) -> String {
    let exclude_args = excluded_paths
        .iter()
        .map(|p| format!("--exclude={}", p))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "echo 'Starting rsync' && rsync -rlptzv --progress {} `pwd`/ {}:{} && echo Reloading services && ssh {} -- './scripts/reload.sh' && echo Done",
        exclude_args, ssh, REMOTE_CODE_DIR, ssh
    )
}

/// Merge patch turning `previous` into `next`.
///
/// Clones dropped from `next` are sent as `null` so the merge removes them.
pub fn status_patch(previous: &DevEnvStatus, next: &DevEnvStatus) -> Result<Value, serde_json::Error> {
    let mut clones = Map::new();
    for key in previous.clones.keys().filter(|k| !next.clones.contains_key(*k)) {
        clones.insert(key.clone(), Value::Null);
    }
    for (key, record) in &next.clones {
        clones.insert(key.clone(), serde_json::to_value(record)?);
    }

    Ok(json!({
        "status": {
            "ssh": next.ssh,
            "cmd": next.cmd,
            "clones": clones,
            "error": next.error,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::CloneRecord;

    fn record(name: &str) -> CloneRecord {
        CloneRecord {
            name: name.to_string(),
            service: name.to_string(),
            ingress: name.to_string(),
        }
    }

    #[test]
    fn test_ssh_and_command() {
        let ssh = ssh_address("devenv-1", "dev.example.com");
        assert_eq!(ssh, "docker@devenv-1.dev.example.com");

        let cmd = sync_command(&ssh, &["node_modules".to_string(), ".git".to_string()]);
        assert_eq!(
            cmd,
            "echo 'Starting rsync' && rsync -rlptzv --progress --exclude=node_modules --exclude=.git `pwd`/ \
             docker@devenv-1.dev.example.com:/home/docker/code && echo Reloading services && \
             ssh docker@devenv-1.dev.example.com -- './scripts/reload.sh' && echo Done"
        );
    }

    #[test]
    fn test_status_patch_removes_dropped_clones_and_clears_error() {
        let previous = DevEnvStatus {
            clones: [("app=api".to_string(), record("api-devenv-1"))].into(),
            error: Some("timed out".to_string()),
            ..Default::default()
        };
        let next = DevEnvStatus {
            ssh: Some("docker@devenv-1.example.com".to_string()),
            clones: [("app=web".to_string(), record("web-devenv-1"))].into(),
            ..Default::default()
        };

        let patch = status_patch(&previous, &next).unwrap();
        assert_eq!(patch["status"]["clones"]["app=api"], Value::Null);
        assert_eq!(patch["status"]["clones"]["app=web"]["name"], "web-devenv-1");
        assert_eq!(patch["status"]["error"], Value::Null);
        assert_eq!(patch["status"]["ssh"], "docker@devenv-1.example.com");
    }
}
