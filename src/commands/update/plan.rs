use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::debug;

const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OsFamily {
    Debian,
    Rhel,
}

impl OsFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Rhel => "rhel",
        }
    }

    pub fn detect() -> Self {
        if let Ok(content) = fs::read_to_string(OS_RELEASE_PATH) {
            if let Some(family) = Self::from_os_release(&content) {
                return family;
            }
        }
        debug!("os-release inconclusive; falling back to package manager probe");
        if locate_program("apt-get").is_some() {
            Self::Debian
        } else {
            Self::Rhel
        }
    }

    pub fn from_os_release(content: &str) -> Option<Self> {
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.trim() != "ID" && key.trim() != "ID_LIKE" {
                continue;
            }
            let value = value.trim().trim_matches('"').to_ascii_lowercase();
            if ["debian", "ubuntu"].iter().any(|id| value.contains(id)) {
                return Some(Self::Debian);
            }
            if ["rhel", "fedora", "centos", "amzn"]
                .iter()
                .any(|id| value.contains(id))
            {
                return Some(Self::Rhel);
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct UpdateStep {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub accepted_exit_codes: Vec<i32>,
}

impl UpdateStep {
    pub fn new(label: &str, program: &str, args: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            accepted_exit_codes: vec![0],
        }
    }

    pub fn accepting(mut self, code: i32) -> Self {
        self.accepted_exit_codes.push(code);
        self
    }

    pub fn accepts(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.accepted_exit_codes.contains(&code))
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub os_family: String,
    pub steps: Vec<UpdateStep>,
}

impl UpdatePlan {
    pub fn detect() -> Self {
        Self::for_family(OsFamily::detect())
    }

    pub fn for_family(family: OsFamily) -> Self {
        let steps = match family {
            OsFamily::Debian => vec![
                UpdateStep::new(
                    "STEP 1 - Update package index (apt-get update)",
                    "apt-get",
                    &["update"],
                ),
                UpdateStep::new(
                    "STEP 2 - Apply security patches (unattended-upgrade -d)",
                    "unattended-upgrade",
                    &["-d"],
                ),
            ],
            OsFamily::Rhel => vec![
                // check-update exits 100 when updates are available.
                UpdateStep::new(
                    "STEP 1 - Check for security updates (yum check-update --security)",
                    "yum",
                    &["check-update", "--security"],
                )
                .accepting(100),
                UpdateStep::new(
                    "STEP 2 - Apply security patches (yum update --security -y)",
                    "yum",
                    &["update", "--security", "-y"],
                ),
            ],
        };

        Self {
            os_family: family.as_str().to_string(),
            steps,
        }
    }

    pub fn preflight(&self) -> Result<()> {
        for step in &self.steps {
            match locate_program(&step.program) {
                Some(path) => debug!(program = %step.program, path = %path.display(), "located"),
                None => bail!(
                    "package manager binary not found: {} (needed for '{}')",
                    step.program,
                    step.label
                ),
            }
        }
        Ok(())
    }
}

pub fn locate_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
