//! Tool availability checking
//!
//! Session control and firmware builds shell out to a handful of host tools.
//! They are looked up on `PATH` once at startup so a missing tool is reported
//! up front instead of as a failed invocation halfway through a deploy.

use std::path::PathBuf;

use fwdemon_core::prelude::*;

/// Tools needed by the build pipeline
pub const BUILD_TOOLS: [&str; 2] = ["git", "make"];

/// Host tools found on `PATH`
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Path to the terminal multiplexer owning device sessions
    pub session_tool: Option<PathBuf>,

    /// Path to the shell that runs helper scripts and the toolchain
    pub shell: Option<PathBuf>,

    pub git: Option<PathBuf>,

    pub make: Option<PathBuf>,
}

impl ToolAvailability {
    /// Look up the session tool, shell, `git` and `make`
    pub fn check(session_tool: &str, shell: &str) -> Self {
        Self {
            session_tool: Self::find(session_tool),
            shell: Self::find(shell),
            git: Self::find("git"),
            make: Self::find("make"),
        }
    }

    fn find(program: &str) -> Option<PathBuf> {
        which::which(program)
            .inspect_err(|e| debug!("{} lookup failed: {}", program, e))
            .ok()
    }

    /// Error for the first missing session tool, if any
    pub fn require_session_tools(&self, session_tool: &str, shell: &str) -> Result<()> {
        if self.session_tool.is_none() {
            return Err(Error::ToolNotFound {
                program: session_tool.to_string(),
            });
        }
        if self.shell.is_none() {
            return Err(Error::ToolNotFound {
                program: shell.to_string(),
            });
        }
        Ok(())
    }

    /// Error for the first missing build tool, if any
    pub fn require_build_tools(&self) -> Result<()> {
        for (program, path) in BUILD_TOOLS.iter().zip([&self.git, &self.make]) {
            if path.is_none() {
                return Err(Error::ToolNotFound {
                    program: program.to_string(),
                });
            }
        }
        Ok(())
    }

    /// User-friendly message when a firmware build cannot run
    pub fn build_unavailable_message(&self) -> Option<&'static str> {
        if self.git.is_some() && self.make.is_some() {
            None
        } else {
            Some("git and make are required to build firmware. Install them or pass --firmware.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn everything() -> ToolAvailability {
        ToolAvailability {
            session_tool: Some(PathBuf::from("/usr/bin/screen")),
            shell: Some(PathBuf::from("/bin/bash")),
            git: Some(PathBuf::from("/usr/bin/git")),
            make: Some(PathBuf::from("/usr/bin/make")),
        }
    }

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(availability.session_tool.is_none());
        assert!(availability.require_build_tools().is_err());
        assert!(availability.build_unavailable_message().is_some());
    }

    #[test]
    fn test_all_tools_available() {
        let availability = everything();
        assert!(availability.require_session_tools("screen", "bash").is_ok());
        assert!(availability.require_build_tools().is_ok());
        assert!(availability.build_unavailable_message().is_none());
    }

    #[test]
    fn test_missing_make_is_named() {
        let availability = ToolAvailability {
            make: None,
            ..everything()
        };
        match availability.require_build_tools() {
            Err(Error::ToolNotFound { program }) => assert_eq!(program, "make"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_session_tool_is_named() {
        let availability = ToolAvailability {
            session_tool: None,
            ..everything()
        };
        let err = availability.require_session_tools("tmux", "bash").unwrap_err();
        assert!(err.to_string().contains("'tmux' was not found"));
    }

    #[test]
    fn test_unknown_program_not_found() {
        assert!(ToolAvailability::find("fwdemon-no-such-tool-4242").is_none());
    }
}
