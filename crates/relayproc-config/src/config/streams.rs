use relayproc_runner::{RedirectTarget, StdStream, StreamConfig, StreamPolicy};
use relayproc_utils::error::ConfigError;

/// Parse a stream spec as written in `[streams]` or on the command line.
///
/// | Spec | Policy |
/// |------|--------|
/// | `interactive` | [`StreamPolicy::Interactive`] |
/// | `discard` | [`StreamPolicy::Discarded`] |
/// | `inherit` | [`StreamPolicy::Inherited`] |
/// | `log` | [`StreamPolicy::Logged`] (stdout/stderr only) |
/// | `file:PATH` | [`StreamPolicy::FileRedirect`], truncating |
/// | `append:PATH` | [`StreamPolicy::FileRedirect`], appending (stdout/stderr only) |
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] keyed `streams.<stream>` for an
/// unknown spec, an empty path, or a spec the stream does not accept.
pub fn parse_stream_spec(stream: StdStream, spec: &str) -> Result<StreamConfig, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: format!("streams.{stream}"),
        value: reason,
    };

    let spec = spec.trim();
    let parsed = match spec {
        "interactive" => StreamConfig::new(StreamPolicy::Interactive),
        "discard" => StreamConfig::new(StreamPolicy::Discarded),
        "inherit" => StreamConfig::new(StreamPolicy::Inherited),
        "log" => StreamConfig::new(StreamPolicy::Logged),
        _ => {
            let (append, path) = if let Some(path) = spec.strip_prefix("file:") {
                (false, path)
            } else if let Some(path) = spec.strip_prefix("append:") {
                (true, path)
            } else {
                return Err(invalid(format!("unknown stream spec '{spec}'")));
            };
            if path.is_empty() {
                return Err(invalid(format!("'{spec}' is missing a file path")));
            }
            StreamConfig::redirect(RedirectTarget::new(path, append))
        }
    };

    if stream == StdStream::Stdin {
        if parsed.policy == StreamPolicy::Logged {
            return Err(invalid("stdin cannot be logged".to_string()));
        }
        if parsed.target.as_ref().is_some_and(|target| target.append) {
            return Err(invalid("stdin cannot be opened in append mode".to_string()));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_keyword_specs() {
        let cases = [
            ("interactive", StreamPolicy::Interactive),
            ("discard", StreamPolicy::Discarded),
            ("inherit", StreamPolicy::Inherited),
            (" log ", StreamPolicy::Logged),
        ];
        for (spec, policy) in cases {
            let parsed = parse_stream_spec(StdStream::Stdout, spec).unwrap();
            assert_eq!(parsed, StreamConfig::new(policy), "spec {spec:?}");
        }
    }

    #[test]
    fn test_file_specs() {
        let parsed = parse_stream_spec(StdStream::Stderr, "append:logs/err.log").unwrap();
        assert_eq!(parsed.policy, StreamPolicy::FileRedirect);
        let target = parsed.target.unwrap();
        assert_eq!(target.path, PathBuf::from("logs/err.log"));
        assert!(target.append);

        let parsed = parse_stream_spec(StdStream::Stdin, "file:input.txt").unwrap();
        assert!(!parsed.target.unwrap().append);
    }

    #[test]
    fn test_path_may_contain_colons() {
        let parsed = parse_stream_spec(StdStream::Stdout, "file:C:/out.txt").unwrap();
        assert_eq!(parsed.target.unwrap().path, PathBuf::from("C:/out.txt"));
    }

    #[test]
    fn test_rejected_specs() {
        for (stream, spec) in [
            (StdStream::Stdout, "pipe"),
            (StdStream::Stdout, "file:"),
            (StdStream::Stdin, "log"),
            (StdStream::Stdin, "append:in.txt"),
        ] {
            let err = parse_stream_spec(stream, spec).unwrap_err();
            match err {
                ConfigError::InvalidValue { key, .. } => {
                    assert_eq!(key, format!("streams.{stream}"));
                }
                other => panic!("unexpected error for {spec:?}: {other:?}"),
            }
        }
    }
}
