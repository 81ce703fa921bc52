// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection for the `report_hostname` option.

use std::env;

use tracing::warn;

/// Determines the host's name, trying in order: the `DD_HOSTNAME`
/// environment variable, the `HOSTNAME` environment variable, and the
/// `gethostname` syscall. Returns `None` when none of them yields a
/// non-empty value.
pub(crate) fn get_hostname() -> Option<String> {
    for variable in ["DD_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(variable) {
            if !hostname.is_empty() {
                return Some(hostname);
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => match hostname.into_string() {
            Ok(hostname) if !hostname.is_empty() => Some(hostname),
            _ => None,
        },
        Err(errno) => {
            warn!("failed to determine the hostname: {errno}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dd_hostname_takes_precedence() {
        // Environment mutation is process-global; this test is the only one
        // in the crate touching DD_HOSTNAME.
        env::set_var("DD_HOSTNAME", "from-dd-hostname");
        assert_eq!(get_hostname().as_deref(), Some("from-dd-hostname"));
        env::remove_var("DD_HOSTNAME");
    }
}
