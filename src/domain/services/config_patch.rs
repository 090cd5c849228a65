//! Config Text Patching
//!
//! Rewrites the upstream of a proxy host config file. Pure function over the
//! file's text so it can be tested without touching disk.
//!
//! Recognised idioms:
//! - `set $server "<host>";`
//! - `set $port <port>;`
//! - `server <host>:<port>;` (upstream blocks, trailing params allowed)
//! - `set $forward_scheme <scheme>;`
//!
//! Replacement is keyed on the exact old value, so every matching token is
//! rewritten wherever it sits in the file.

use crate::domain::entities::UpstreamTarget;
use regex::{Captures, Regex};

/// Result of patching a config text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub content: String,
    /// Number of idiom occurrences rewritten
    pub replacements: usize,
}

impl PatchOutcome {
    pub fn is_noop(&self) -> bool {
        self.replacements == 0
    }
}

/// Replace `old`'s host/port/scheme with `new`'s in `content`.
pub fn patch_upstream(
    content: &str,
    old: &UpstreamTarget,
    new: &UpstreamTarget,
) -> Result<PatchOutcome, regex::Error> {
    let old_host = regex::escape(&old.host);
    let mut replacements = 0;
    let mut text = content.to_string();

    let server_var = Regex::new(&format!(r#"(set\s+\$server\s+)"{}"(\s*;)"#, old_host))?;
    text = replace_counted(&server_var, &text, &mut replacements, |caps| {
        format!("{}\"{}\"{}", &caps[1], new.host, &caps[2])
    });

    let port_var = Regex::new(&format!(r"(set\s+\$port\s+){}(\s*;)", old.port))?;
    text = replace_counted(&port_var, &text, &mut replacements, |caps| {
        format!("{}{}{}", &caps[1], new.port, &caps[2])
    });

    let upstream = Regex::new(&format!(
        r"(?m)^(\s*server\s+){}:{}([\s;])",
        old_host, old.port
    ))?;
    text = replace_counted(&upstream, &text, &mut replacements, |caps| {
        format!("{}{}:{}{}", &caps[1], new.host, new.port, &caps[2])
    });

    if old.scheme != new.scheme {
        let scheme_var = Regex::new(&format!(
            r"(set\s+\$forward_scheme\s+){}(\s*;)",
            old.scheme.as_str()
        ))?;
        text = replace_counted(&scheme_var, &text, &mut replacements, |caps| {
            format!("{}{}{}", &caps[1], new.scheme, &caps[2])
        });
    }

    Ok(PatchOutcome {
        content: text,
        replacements,
    })
}

fn replace_counted<F>(re: &Regex, text: &str, counter: &mut usize, rep: F) -> String
where
    F: Fn(&Captures) -> String,
{
    let found = re.find_iter(text).count();
    if found == 0 {
        return text.to_string();
    }
    *counter += found;
    re.replace_all(text, |caps: &Captures| rep(caps)).into_owned()
}
