//! CLI/env configuration.
//!
//! A hand-rolled argv loop plus an env-overrides-CLI precedent for the
//! thread count, built on `ring_core::env` for the generic
//! parse-with-default helper. No `clap` — nothing else in this
//! workspace pulls in an arg-parsing crate either.

use std::path::PathBuf;

use ring_core::env::env_get_opt;

/// Parsed, immutable for the lifetime of the process once built.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub threads: usize,
    pub sq_entries: u32,
    pub buffer_capacity: u32,
    pub buffer_size: u32,
    /// `Some(dir)` enables static-file mode rooted at `dir`; `None` is
    /// the default echo mode.
    pub dir: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    /// `--buffer-capacity` was not a power of two.
    NonPowerOfTwoCapacity(u32),
    /// A flag expecting a value (`--port`, `--threads`, ...) got none.
    MissingValue(&'static str),
    /// A flag's value didn't parse as the expected type.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NonPowerOfTwoCapacity(c) => {
                write!(f, "--buffer-capacity {c} is not a power of two")
            }
            ConfigError::MissingValue(flag) => write!(f, "{flag} requires a value"),
            ConfigError::InvalidValue(flag, got) => write!(f, "{flag}: invalid value '{got}'"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn is_power_of_two(n: u32) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            sq_entries: ring_runtime::engine::SQ_ENTRIES,
            buffer_capacity: ring_runtime::buffers::CAPACITY,
            buffer_size: ring_runtime::buffers::BUFFER_SIZE,
            dir: None,
        }
    }
}

impl Config {
    /// Parse `argv[1..]`. `--threads`/`-t` can be overridden by the
    /// `RING_THREADS` env var.
    pub fn parse(args: &[String]) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--port" | "-p" => {
                    let v = next_value(args, &mut i, "--port")?;
                    config.port = parse_value(&v, "--port")?;
                }
                "--threads" | "-t" => {
                    let v = next_value(args, &mut i, "--threads")?;
                    config.threads = parse_value(&v, "--threads")?;
                }
                "--dir" | "-d" => {
                    let v = next_value(args, &mut i, "--dir")?;
                    config.dir = Some(PathBuf::from(v));
                }
                "--sq-entries" => {
                    let v = next_value(args, &mut i, "--sq-entries")?;
                    config.sq_entries = parse_value(&v, "--sq-entries")?;
                }
                "--buffer-capacity" => {
                    let v = next_value(args, &mut i, "--buffer-capacity")?;
                    config.buffer_capacity = parse_value(&v, "--buffer-capacity")?;
                }
                "--buffer-size" => {
                    let v = next_value(args, &mut i, "--buffer-size")?;
                    config.buffer_size = parse_value(&v, "--buffer-size")?;
                }
                s if s.parse::<u16>().is_ok() => {
                    config.port = s.parse().unwrap();
                }
                _ => {}
            }
            i += 1;
        }

        if let Some(threads) = env_get_opt::<usize>("RING_THREADS") {
            if threads >= 1 {
                config.threads = threads;
            }
        }
        config.threads = config.threads.max(1);

        if !is_power_of_two(config.buffer_capacity) {
            return Err(ConfigError::NonPowerOfTwoCapacity(config.buffer_capacity));
        }

        Ok(config)
    }
}

fn next_value(args: &[String], i: &mut usize, flag: &'static str) -> Result<String, ConfigError> {
    *i += 1;
    args.get(*i).cloned().ok_or(ConfigError::MissingValue(flag))
}

fn parse_value<T: std::str::FromStr>(v: &str, flag: &'static str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| ConfigError::InvalidValue(flag, v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_to_echo_mode_on_port_8080() {
        let config = Config::parse(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.dir.is_none());
    }

    #[test]
    fn positional_port_is_accepted() {
        let config = Config::parse(&args(&["9090"])).unwrap();
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn dir_flag_enables_static_file_mode() {
        let config = Config::parse(&args(&["--dir", "/srv/www"])).unwrap();
        assert_eq!(config.dir, Some(PathBuf::from("/srv/www")));
    }

    #[test]
    fn rejects_non_power_of_two_buffer_capacity() {
        let err = Config::parse(&args(&["--buffer-capacity", "1000"])).unwrap_err();
        assert!(matches!(err, ConfigError::NonPowerOfTwoCapacity(1000)));
    }

    #[test]
    fn env_threads_overrides_cli_threads() {
        std::env::set_var("RING_THREADS", "6");
        let config = Config::parse(&args(&["--threads", "2"])).unwrap();
        assert_eq!(config.threads, 6);
        std::env::remove_var("RING_THREADS");
    }

    #[test]
    fn missing_value_is_reported() {
        let err = Config::parse(&args(&["--port"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("--port")));
    }
}
