//! The deployment record left on a device by its last successful update.
//!
//! The record is a Java-style `.properties` file. Only the subset that
//! provisioning tools actually write is understood: `key=value` or
//! `key: value` lines, `#`/`!` comments, backslash line continuations and
//! the common escapes.

use std::collections::HashMap;

use crate::vfs::FileHandle;

/// File name of the record under the device's system directory.
pub const DEPLOYMENT_PROPERTIES: &str = "deployment.properties";

pub const TALKING_BOOK_ID: &str = "TALKINGBOOKID";
pub const PROJECT: &str = "PROJECT";
pub const DEPLOYMENT: &str = "DEPLOYMENT";
pub const COMMUNITY: &str = "COMMUNITY";
pub const PACKAGE: &str = "PACKAGE";
pub const RECIPIENT_ID: &str = "RECIPIENTID";
pub const DEPLOYMENT_UUID: &str = "DEPLOYMENT_UUID";
pub const USERNAME: &str = "USERNAME";
pub const TBCDID: &str = "TBCDID";
pub const TEST_DEPLOYMENT: &str = "TESTDEPLOYMENT";
pub const FIRMWARE: &str = "FIRMWARE";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentProperties {
    values: HashMap<String, String>,
}

impl DeploymentProperties {
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        let mut logical = String::new();

        for raw in text.lines() {
            let line = raw.trim_start();
            if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            // An odd number of trailing backslashes continues the line.
            let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
            if trailing % 2 == 1 {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }
            logical.push_str(line);

            let (key, value) = split_pair(&logical);
            values.insert(unescape(key), unescape(value));
            logical.clear();
        }
        if !logical.is_empty() {
            let (key, value) = split_pair(&logical);
            values.insert(unescape(key), unescape(value));
        }

        Self { values }
    }

    /// Read `system/deployment.properties`. Missing or unreadable records
    /// yield `None`; a damaged device is an expected input.
    pub async fn load(system_dir: &FileHandle) -> Option<Self> {
        let file = system_dir.open(DEPLOYMENT_PROPERTIES);
        match file.read_to_string().await {
            Ok(text) => Some(Self::parse(&text)),
            Err(e) => {
                if !e.is_not_found() {
                    tracing::debug!(path = %file, error = %e, "unreadable deployment record");
                }
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split at the first unescaped `=`, `:` or whitespace.
fn split_pair(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (line[..i].trim_end(), line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
