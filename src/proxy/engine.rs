use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

use super::error::EngineError;
use super::lifecycle::ProxyConfig;

/// The process that forwards traffic from the external to the internal port
pub trait ProxyEngine {
    /// A running engine instance
    type Instance;

    fn start(&mut self, config: &ProxyConfig) -> Result<Self::Instance, EngineError>;

    fn stop(&mut self, instance: Self::Instance) -> Result<(), EngineError>;
}

/// Runs an external proxy program (socat by default) as a child process
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    settle_time: Duration,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            settle_time: Duration::from_millis(200),
        }
    }

    /// How long to wait after launch before checking the child is still alive
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }
}

impl ProxyEngine for CommandEngine {
    type Instance = Child;

    fn start(&mut self, config: &ProxyConfig) -> Result<Child, EngineError> {
        let program = which::which(&self.program).map_err(|source| {
            EngineError::ProgramNotFound {
                program: self.program.clone(),
                source,
            }
        })?;

        let args = render_args(&self.args, config);
        debug!("Launching {} {:?}", program.display(), args);

        let mut child = Command::new(&program)
            .args(&args)
            .envs(build_env_vars(config))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        std::thread::sleep(self.settle_time);
        if let Some(status) = child.try_wait()? {
            return Err(EngineError::ExitedEarly(status.code().unwrap_or(-1)));
        }

        info!("Proxy engine {} running as pid {}", self.program, child.id());
        Ok(child)
    }

    fn stop(&mut self, mut child: Child) -> Result<(), EngineError> {
        if child.try_wait()?.is_none() {
            debug!("Stopping proxy engine pid {}", child.id());
            child.kill()?;
        }
        child.wait()?;
        Ok(())
    }
}

/// Build environment variables for the engine process
pub fn build_env_vars(config: &ProxyConfig) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert(
        "LANPROXY_EXTERNAL_PORT".to_string(),
        config.external_port().to_string(),
    );
    env.insert(
        "LANPROXY_INTERNAL_PORT".to_string(),
        config.internal_port().to_string(),
    );
    env.insert(
        "LANPROXY_REWRITE_HOST_HEADERS".to_string(),
        config.rewrite_host_headers().to_string(),
    );

    env
}

/// Substitute `{external}`, `{internal}` and `{rewrite}` in engine arguments
pub fn render_args(args: &[String], config: &ProxyConfig) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{external}", &config.external_port().to_string())
                .replace("{internal}", &config.internal_port().to_string())
                .replace("{rewrite}", &config.rewrite_host_headers().to_string())
        })
        .collect()
}
