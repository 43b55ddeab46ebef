use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::Settings;
use crate::model::PackageUpdate;

pub const MAX_ERROR_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct Recognizer {
    pub name: String,
    pub pattern: Regex,
}

impl Recognizer {
    pub fn new(name: &str, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("failed to compile recognizer {name}: {pattern}"))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ErrorRules {
    rules: Vec<Recognizer>,
    ignore: Vec<Regex>,
}

impl ErrorRules {
    pub fn defaults() -> Result<Self> {
        Ok(Self {
            rules: vec![
                Recognizer::new("apt-error", r"^E:\s")?,
                Recognizer::new("dpkg-error", r"^dpkg: error")?,
                Recognizer::new("generic", r"(?i)\b(error|failed|fail)\b")?,
            ],
            ignore: vec![
                Regex::new(r"^(Get|Hit|Ign):").context("failed to compile apt progress filter")?,
            ],
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut rules = Self::defaults()?;
        if let Some(pattern) = &settings.extra_error_pattern {
            rules = rules.with_rule(Recognizer {
                name: "configured".to_string(),
                pattern: pattern.clone(),
            });
        }
        if let Some(pattern) = &settings.ignore_error_pattern {
            rules = rules.with_ignore(pattern.clone());
        }
        Ok(rules)
    }

    pub fn with_rule(mut self, rule: Recognizer) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_ignore(mut self, pattern: Regex) -> Self {
        self.ignore.push(pattern);
        self
    }

    pub fn classify_line(&self, line: &str) -> Option<&str> {
        let trimmed = line.trim();
        if trimmed.is_empty() || self.ignore.iter().any(|pattern| pattern.is_match(trimmed)) {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(trimmed))
            .map(|rule| rule.name.as_str())
    }

    pub fn error_lines(&self, text: &str) -> Vec<String> {
        text.lines()
            .filter(|line| self.classify_line(line).is_some())
            .map(|line| line.trim().to_string())
            .take(MAX_ERROR_LINES)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PackageRules {
    rules: Vec<Recognizer>,
}

impl PackageRules {
    pub fn defaults() -> Result<Self> {
        Ok(Self {
            rules: vec![
                // unattended-upgrade summary: "  libssl3 (3.0.2-0ubuntu1.10 => 3.0.2-0ubuntu1.12)"
                Recognizer::new(
                    "upgrade-summary",
                    r"^\s+(?P<name>[\w.+\-]+)\s+\((?P<old>[\w.~+:\-]+)\s+=>\s+(?P<new>[\w.~+:\-]+)\)",
                )?,
                // dpkg: "Unpacking libssl3:amd64 (3.0.2-0ubuntu1.12) over (3.0.2-0ubuntu1.10) ..."
                Recognizer::new(
                    "dpkg-unpack",
                    r"^Unpacking (?P<name>[\w.+\-]+)(?::[\w\-]+)? \((?P<new>[^)\s]+)\) over \((?P<old>[^)\s]+)\)",
                )?,
                // yum/dnf: "  Upgrading  : openssl-libs-1:1.1.1k-9.el8_7.x86_64   1/4"
                Recognizer::new(
                    "rpm-transaction",
                    r"^\s*(?:Upgrading|Updating)\s*:\s*(?:\d+:)?(?P<name>[\w.+\-]+?)-(?P<new>(?:\d+:)?\d[\w.~+\-]*?)(?:\.(?:x86_64|noarch|i686|aarch64|ppc64le|s390x))?\s+\d+/\d+\s*$",
                )?,
            ],
        })
    }

    pub fn extract(&self, text: &str) -> Vec<PackageUpdate> {
        let mut seen = HashSet::new();
        let mut packages = Vec::new();

        for line in text.lines() {
            let Some(captures) = self
                .rules
                .iter()
                .find_map(|rule| rule.pattern.captures(line))
            else {
                continue;
            };
            let Some(name) = captures.name("name").map(|m| m.as_str().to_string()) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }

            packages.push(PackageUpdate {
                name,
                old_version: captures.name("old").map(|m| m.as_str().to_string()),
                new_version: captures.name("new").map(|m| m.as_str().to_string()),
            });
        }

        packages
    }
}
