//! Decides, per standard stream, whether the caller talks to the OS pipe
//! directly or through a relay thread.
//!
//! A caller thread must never be forced to block on more than one raw pipe.
//! With at most one interactive stream that cannot happen, so the pipe is
//! handed out as-is. With two or more, every interactive stream gets its own
//! buffer serviced by a dedicated worker.

use serde::Serialize;

use crate::builder::ProcessConfiguration;
use crate::types::{StdStream, StreamPolicy};

/// How one standard stream is serviced after launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Resolved by the OS at spawn time (file, inherited, or null device).
    Os,
    /// The caller gets the raw pipe.
    Direct,
    /// The caller gets a relay buffer; a worker services the pipe.
    Relayed,
    /// A worker drains the pipe and drops the bytes.
    Discard,
    /// A worker drains the pipe into the structured logger.
    Log,
    /// stderr shares stdout's channel.
    Alias,
}

impl Route {
    /// Whether a worker thread services this stream.
    #[must_use]
    pub const fn has_worker(&self) -> bool {
        matches!(self, Self::Relayed | Self::Discard | Self::Log)
    }
}

/// Result of [`plan_topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopologyPlan {
    pub stdin: Route,
    pub stdout: Route,
    pub stderr: Route,
    /// Interactive streams, counting a merged stdout/stderr pair once.
    pub interactive_count: usize,
}

impl TopologyPlan {
    #[must_use]
    pub const fn route(&self, stream: StdStream) -> Route {
        match stream {
            StdStream::Stdin => self.stdin,
            StdStream::Stdout => self.stdout,
            StdStream::Stderr => self.stderr,
        }
    }

    /// Number of background threads the launch will start.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        [self.stdin, self.stdout, self.stderr]
            .iter()
            .filter(|route| route.has_worker())
            .count()
    }
}

/// Plan the stream topology for a configuration. Pure; launches nothing.
#[must_use]
pub fn plan_topology(config: &ProcessConfiguration) -> TopologyPlan {
    plan(
        config.policy(StdStream::Stdin),
        config.policy(StdStream::Stdout),
        config.policy(StdStream::Stderr),
        config.is_merged(),
        config.settings().always_relay,
    )
}

fn plan(
    stdin: StreamPolicy,
    stdout: StreamPolicy,
    stderr: StreamPolicy,
    merged: bool,
    always_relay: bool,
) -> TopologyPlan {
    let stdin = classify(StdStream::Stdin, stdin);
    let stdout = classify(StdStream::Stdout, stdout);
    let stderr = if merged {
        None
    } else {
        Some(classify(StdStream::Stderr, stderr))
    };

    let interactive_count = [Some(stdin), Some(stdout), stderr]
        .into_iter()
        .flatten()
        .filter(|route| route.is_none())
        .count();

    let interactive = if always_relay || interactive_count > 1 {
        Route::Relayed
    } else {
        Route::Direct
    };

    TopologyPlan {
        stdin: stdin.unwrap_or(interactive),
        stdout: stdout.unwrap_or(interactive),
        stderr: match stderr {
            None => Route::Alias,
            Some(route) => route.unwrap_or(interactive),
        },
        interactive_count,
    }
}

/// Fixed route for a policy, or `None` for an interactive stream whose route
/// depends on how many interactive streams there are.
fn classify(stream: StdStream, policy: StreamPolicy) -> Option<Route> {
    match policy {
        StreamPolicy::Interactive => None,
        StreamPolicy::FileRedirect | StreamPolicy::Inherited => Some(Route::Os),
        // stdin has nothing to drain; it reads from the null device
        StreamPolicy::Discarded | StreamPolicy::Logged if !stream.is_output() => Some(Route::Os),
        StreamPolicy::Discarded => Some(Route::Discard),
        StreamPolicy::Logged => Some(Route::Log),
    }
}
