use std::env;
use std::str::FromStr;
use std::time::Duration;

use event_bus::consumer_retry::RetryConfig;

use crate::consumer::ConsumerSettings;

/// Which halves of the service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    All,
    Api,
    Consumer,
}

impl ServiceRole {
    pub fn runs_api(self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Api)
    }

    pub fn runs_consumer(self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Consumer)
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(ServiceRole::All),
            "api" => Ok(ServiceRole::Api),
            "consumer" => Ok(ServiceRole::Consumer),
            other => Err(format!(
                "SERVICE_ROLE must be 'all', 'api' or 'consumer', got '{}'",
                other
            )),
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub role: ServiceRole,
    pub auth_service_url: String,
    pub auth_timeout_ms: u64,
    pub exchange: String,
    pub queue: String,
    pub consumer_workers: usize,
    pub apply_timeout_ms: u64,
    pub max_deliveries: u64,
    pub redelivery_delay_ms: u64,
    pub max_inflight_publishes: usize,
    pub publish_acquire_timeout_ms: u64,
    pub startup_retry_attempts: u32,
    pub startup_retry_delay_ms: u64,
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = string_or("BUS_TYPE", "nats").to_lowercase();
        if bus_type != "nats" && bus_type != "inmemory" {
            return Err(format!(
                "BUS_TYPE must be 'inmemory' or 'nats', got '{}'",
                bus_type
            ));
        }

        let role = parsed("SERVICE_ROLE", ServiceRole::All)?;

        let config = Config {
            database_url,
            bus_type,
            nats_url: string_or("NATS_URL", "nats://localhost:4222"),
            host: string_or("HOST", "0.0.0.0"),
            port: parsed("PORT", 5003)?,
            role,
            auth_service_url: string_or("AUTH_SERVICE_URL", "http://auth-service:3001/auth"),
            auth_timeout_ms: parsed("AUTH_TIMEOUT_MS", 3000)?,
            exchange: string_or("COMMENTS_EXCHANGE", "comments-exchange"),
            queue: string_or("COMMENTS_QUEUE", "comments-queue"),
            consumer_workers: parsed("CONSUMER_WORKERS", 1)?,
            apply_timeout_ms: parsed("APPLY_TIMEOUT_MS", 5000)?,
            max_deliveries: parsed("MAX_DELIVERIES", 5)?,
            redelivery_delay_ms: parsed("REDELIVERY_DELAY_MS", 1000)?,
            max_inflight_publishes: parsed("MAX_INFLIGHT_PUBLISHES", 64)?,
            publish_acquire_timeout_ms: parsed("PUBLISH_ACQUIRE_TIMEOUT_MS", 2000)?,
            startup_retry_attempts: parsed("STARTUP_RETRY_ATTEMPTS", 10)?,
            startup_retry_delay_ms: parsed("STARTUP_RETRY_DELAY_MS", 2000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that parse but can never process an event
    fn validate(&self) -> Result<(), String> {
        if self.apply_timeout_ms == 0 {
            return Err("APPLY_TIMEOUT_MS must be greater than 0".to_string());
        }
        // The in-memory broker is private to this process
        if self.bus_type == "inmemory" && self.role != ServiceRole::All {
            return Err(format!(
                "BUS_TYPE=inmemory requires SERVICE_ROLE=all, got {:?}",
                self.role
            ));
        }
        Ok(())
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            apply_timeout: Duration::from_millis(self.apply_timeout_ms),
            max_deliveries: self.max_deliveries.max(1),
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
            resubscribe: RetryConfig::fixed(
                self.startup_retry_attempts,
                Duration::from_millis(self.startup_retry_delay_ms),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "BUS_TYPE",
        "PORT",
        "SERVICE_ROLE",
        "MAX_DELIVERIES",
        "APPLY_TIMEOUT_MS",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/comments");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bus_type, "nats");
        assert_eq!(config.port, 5003);
        assert_eq!(config.role, ServiceRole::All);
        assert_eq!(config.exchange, "comments-exchange");
        assert_eq!(config.queue, "comments-queue");
        assert_eq!(config.consumer_settings(), ConsumerSettings::default());
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_errors() {
        clear();
        assert!(Config::from_env().is_err());

        env::set_var("DATABASE_URL", "postgres://localhost/comments");
        env::set_var("PORT", "not-a-port");
        assert!(Config::from_env().is_err());

        env::set_var("PORT", "8080");
        env::set_var("BUS_TYPE", "rabbit");
        assert!(Config::from_env().is_err());

        env::set_var("BUS_TYPE", "nats");
        env::set_var("SERVICE_ROLE", "consumer");
        let config = Config::from_env().unwrap();
        assert!(config.role.runs_consumer());
        assert!(!config.role.runs_api());
        clear();
    }

    #[test]
    #[serial]
    fn test_unusable_combinations_are_rejected() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/comments");

        env::set_var("APPLY_TIMEOUT_MS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.contains("APPLY_TIMEOUT_MS"), "got {}", err);
        env::remove_var("APPLY_TIMEOUT_MS");

        env::set_var("BUS_TYPE", "inmemory");
        for role in ["api", "consumer"] {
            env::set_var("SERVICE_ROLE", role);
            let err = Config::from_env().unwrap_err();
            assert!(err.contains("SERVICE_ROLE=all"), "got {}", err);
        }

        env::set_var("SERVICE_ROLE", "all");
        assert!(Config::from_env().is_ok());
        clear();
    }
}
