//! Local image build and push through the docker command line.
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{debug, info};

pub const DOCKER_PROGRAM: &str = "docker";

#[derive(Error, Debug)]
pub enum BuildToolError {
    #[error("could not run `{0}`: `{1}`")]
    Spawn(String, std::io::Error),

    #[error("`{0}` exited with {1}")]
    CommandFailed(String, ExitStatus),
}

#[cfg_attr(test, mockall::automock)]
pub trait ImageBuilder: Send + Sync {
    fn build(&self, image: &str, dockerfile: Option<PathBuf>) -> Result<(), BuildToolError>;
    fn push(&self, image: &str) -> Result<(), BuildToolError>;
}

/// Runs `docker build` and `docker push` from a build context directory.
pub struct DockerCli {
    program: String,
    context_dir: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DOCKER_PROGRAM, ".")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>, context_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            context_dir: context_dir.as_ref().to_path_buf(),
        }
    }

    fn build_args(image: &str, dockerfile: Option<&Path>) -> Vec<String> {
        let mut args = vec!["build".to_string(), "-t".to_string(), image.to_string()];
        if let Some(dockerfile) = dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.to_string_lossy().into_owned());
        }
        args.push(".".to_string());
        args
    }

    fn run(&self, args: &[String]) -> Result<(), BuildToolError> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!("running `{command_line}`");
        let status = Command::new(&self.program)
            .args(args)
            .current_dir(&self.context_dir)
            .status()
            .map_err(|err| BuildToolError::Spawn(command_line.clone(), err))?;
        if !status.success() {
            return Err(BuildToolError::CommandFailed(command_line, status));
        }
        Ok(())
    }
}

impl ImageBuilder for DockerCli {
    fn build(&self, image: &str, dockerfile: Option<PathBuf>) -> Result<(), BuildToolError> {
        info!("Building docker image {image}");
        self.run(&Self::build_args(image, dockerfile.as_deref()))
    }

    fn push(&self, image: &str) -> Result<(), BuildToolError> {
        info!("Pushing docker image {image}");
        self.run(&["push".to_string(), image.to_string()])
    }
}
