//! Startup sequence derived from configuration.
//!
//! With a mesh setup key the host first joins the mesh network, then the DNS
//! engine starts. Without one only the DNS engine runs.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, MeshConfig};
use crate::error::DnsError;
use crate::supervisor::{LaunchStep, StepKind};

/// Logical name of the mesh daemon process.
pub const MESH_DAEMON: &str = "mesh-daemon";

/// Logical name of the DNS engine process.
pub const DNS_ENGINE: &str = "dns-engine";

/// Build the ordered launch steps for `config`.
///
/// `config_path` is forwarded to the DNS engine so it resolves the same
/// configuration.
pub fn build_plan(config: &Config, config_path: Option<&Path>) -> Result<Vec<LaunchStep>, DnsError> {
    let mut steps = Vec::new();
    if let Some(mesh) = config.mesh() {
        steps.extend(mesh_steps(&mesh));
    }
    steps.push(dns_engine_step(config, config_path)?);
    Ok(steps)
}

fn mesh_steps(mesh: &MeshConfig) -> Vec<LaunchStep> {
    let service = |action: &str| LaunchStep {
        name: format!("mesh-service-{action}"),
        program: OsString::from(&mesh.command),
        args: vec!["service".to_string(), action.to_string()],
        kind: StepKind::Oneshot,
        // No service manager inside containers.
        required: false,
    };

    let mut args = vec![
        "up".to_string(),
        "--foreground-mode".to_string(),
        format!("--setup-key={}", mesh.setup_key),
        format!("--management-url={}", mesh.management_url),
        format!("--hostname={}", mesh.hostname),
        format!("--log-level={}", mesh.log_level),
    ];
    if !mesh.dns_labels.is_empty() {
        args.push("--extra-dns-labels".to_string());
        args.push(mesh.dns_labels.join(","));
    }

    vec![
        service("install"),
        service("start"),
        LaunchStep {
            name: MESH_DAEMON.to_string(),
            program: OsString::from(&mesh.command),
            args,
            kind: StepKind::Managed {
                settle: mesh.settle,
            },
            required: true,
        },
    ]
}

fn dns_engine_step(config: &Config, config_path: Option<&Path>) -> Result<LaunchStep, DnsError> {
    let program = match &config.dns_engine_command {
        Some(command) => command.clone().into_os_string(),
        None => std::env::current_exe()?.into_os_string(),
    };

    let mut args = vec!["serve-dns".to_string()];
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }

    Ok(LaunchStep {
        name: DNS_ENGINE.to_string(),
        program,
        args,
        kind: StepKind::Managed {
            settle: Duration::ZERO,
        },
        required: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "domains": ["example.com"],
            "dns_engine_command": "/usr/local/bin/nb-dns",
        }))
        .unwrap()
    }

    #[test]
    fn test_plan_without_setup_key() {
        let config = base_config();
        let steps = build_plan(&config, None).unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, DNS_ENGINE);
        assert_eq!(steps[0].program, OsString::from("/usr/local/bin/nb-dns"));
        assert_eq!(steps[0].args, vec!["serve-dns"]);
        assert!(steps[0].required);
    }

    #[test]
    fn test_plan_forwards_config_path() {
        let config = base_config();
        let path = PathBuf::from("/etc/nb-dns/config.toml");
        let steps = build_plan(&config, Some(&path)).unwrap();

        assert_eq!(
            steps[0].args,
            vec!["serve-dns", "--config", "/etc/nb-dns/config.toml"]
        );
    }

    #[test]
    fn test_plan_with_setup_key() {
        let mut config = base_config();
        config.setup_key = Some("KEY-123".to_string());
        config.dns_labels = vec!["dns".to_string(), "resolver".to_string()];
        config.mesh_settle_secs = 3;

        let steps = build_plan(&config, None).unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "mesh-service-install",
                "mesh-service-start",
                MESH_DAEMON,
                DNS_ENGINE
            ]
        );

        assert!(!steps[0].required);
        assert_eq!(steps[0].kind, StepKind::Oneshot);
        assert_eq!(steps[1].args, vec!["service", "start"]);

        let up = &steps[2];
        assert!(up.required);
        assert_eq!(up.program, OsString::from("netbird"));
        assert_eq!(
            up.kind,
            StepKind::Managed {
                settle: Duration::from_secs(3)
            }
        );
        assert_eq!(
            up.args,
            vec![
                "up",
                "--foreground-mode",
                "--setup-key=KEY-123",
                "--management-url=https://api.netbird.io",
                "--hostname=nb-dns",
                "--log-level=info",
                "--extra-dns-labels",
                "dns,resolver",
            ]
        );
    }

    #[test]
    fn test_no_labels_flag_when_empty() {
        let mut config = base_config();
        config.setup_key = Some("KEY".to_string());
        config.dns_labels.clear();

        let steps = build_plan(&config, None).unwrap();
        assert!(!steps[2].args.iter().any(|a| a == "--extra-dns-labels"));
    }
}
