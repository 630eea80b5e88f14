//! Spawning of model server processes and draining of their output.

use std::io;
use std::process::Stdio;

use sdforge_core::ModelConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

const PORT_PLACEHOLDER: &str = "{port}";

/// Build the launch command for a server model, substituting the allocated
/// port into the configured arguments. If no argument carries the `{port}`
/// placeholder, a trailing `--port <port>` is appended.
pub fn build_command(config: &ModelConfig, port: u16) -> Command {
    let mut cmd = Command::new(&config.command);
    let port_str = port.to_string();

    let mut port_injected = false;
    for arg in &config.args {
        if arg.contains(PORT_PLACEHOLDER) {
            cmd.arg(arg.replace(PORT_PLACEHOLDER, &port_str));
            port_injected = true;
        } else {
            cmd.arg(arg);
        }
    }
    if !port_injected {
        cmd.arg("--port").arg(&port_str);
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Spawn a server process for the given model on the given port.
pub fn spawn_server(config: &ModelConfig, port: u16) -> io::Result<Child> {
    build_command(config, port).spawn()
}

/// Drain the child's stdout/stderr into tracing so the pipes never fill up
/// and block the server. Lines are logged at debug level.
pub fn drain_output(child: &mut Child, model_id: &str) {
    if let Some(stdout) = child.stdout.take() {
        let model_id = model_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "model_process", model_id = %model_id, "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let model_id = model_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "model_process", model_id = %model_id, "{line}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdforge_core::{ExecMode, GenerationDefaults};

    fn server_config(args: Vec<&str>) -> ModelConfig {
        ModelConfig {
            id: "sdxl".to_string(),
            name: "SDXL".to_string(),
            exec_mode: ExecMode::Server,
            command: "sd-server".to_string(),
            args: args.into_iter().map(String::from).collect(),
            port: None,
            endpoint: None,
            generation_defaults: GenerationDefaults::default(),
        }
    }

    #[test]
    fn placeholder_is_substituted() {
        let config = server_config(vec!["--listen", "127.0.0.1:{port}"]);
        let cmd = build_command(&config, 1400);
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["--listen", "127.0.0.1:1400"]);
    }

    #[test]
    fn port_flag_appended_when_no_placeholder() {
        let config = server_config(vec!["--model", "sdxl.safetensors"]);
        let cmd = build_command(&config, 1400);
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["--model", "sdxl.safetensors", "--port", "1400"]);
    }
}
