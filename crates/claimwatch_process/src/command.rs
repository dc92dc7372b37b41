use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No command configured for {0}")]
    Unconfigured(String),

    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Configuration problems that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LaunchError::Spawn { .. })
    }
}

/// A validated command: the executable was located once, at startup.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Resolve a configured `[program, args...]` vector for `role`.
    ///
    /// Programs containing a path separator must exist on disk (relative
    /// paths are taken from `working_dir` when given); bare names are looked
    /// up on `PATH`.
    pub fn resolve(role: &str, command: &[String], working_dir: Option<&Path>) -> Result<Self, LaunchError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| LaunchError::Unconfigured(role.to_string()))?;
        if program.trim().is_empty() {
            return Err(LaunchError::Unconfigured(role.to_string()));
        }
        if let Some(dir) = working_dir {
            if !dir.is_dir() {
                return Err(LaunchError::MissingWorkingDir(dir.to_path_buf()));
            }
        }

        let program_path = Path::new(program);
        let resolved = if program_path.is_absolute() || program_path.components().count() > 1 {
            let candidate = match working_dir {
                Some(dir) if program_path.is_relative() => dir.join(program_path),
                _ => program_path.to_path_buf(),
            };
            if !candidate.is_file() {
                return Err(LaunchError::NotFound(candidate.display().to_string()));
            }
            candidate
        } else {
            which::which(program).map_err(|_| LaunchError::NotFound(program.clone()))?
        };

        Ok(Self {
            program: resolved,
            args: args.to_vec(),
            working_dir: working_dir.map(Path::to_path_buf),
            env: Vec::new(),
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Program and arguments, space separated, for log lines.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    pub(crate) fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}
