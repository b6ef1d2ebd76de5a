use chrono_tz::Tz;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "chain-api")]
#[command(about = "Hypermedia API over sites, devices, sensors and their readings", long_about = None)]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Postgres connection string; without one everything is kept in memory
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// MQTT broker host; without one change notifications are only logged
    #[arg(long, env = "MQTT_BROKER")]
    pub mqtt_broker: Option<String>,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic prefix change notifications are published under
    #[arg(long, env = "TOPIC_ROOT", default_value = "chain")]
    pub topic_root: String,

    /// Zone used to interpret timestamps submitted without an offset
    #[arg(long, env = "TIME_ZONE", default_value = "America/New_York")]
    pub time_zone: Tz,

    /// Base of the per-site websocket stream links (default ws://<host>/ws/)
    #[arg(long, env = "WEBSOCKET_BASE")]
    pub websocket_base: Option<String>,

    #[arg(long, env = "ROLLUP_INTERVAL_MS", default_value_t = 60_000)]
    pub rollup_interval_ms: u64,

    #[arg(long, env = "ROLLUP_BATCH", default_value_t = 512)]
    pub rollup_batch: usize,

    #[arg(long, env = "ROLLUP_QUEUE", default_value_t = 10_000)]
    pub rollup_queue: usize,

    /// Cache lifetime, in seconds, of site summaries
    #[arg(long, env = "SUMMARY_MAX_AGE", default_value_t = 60)]
    pub summary_max_age: u32,
}

/// Request-time settings shared by the controllers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub time_zone: Tz,
    pub websocket_base: Option<String>,
    pub summary_max_age: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::America::New_York,
            websocket_base: None,
            summary_max_age: 60,
        }
    }
}

impl From<&Args> for Settings {
    fn from(args: &Args) -> Self {
        Self {
            time_zone: args.time_zone,
            websocket_base: args.websocket_base.clone(),
            summary_max_age: args.summary_max_age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["chain-api"]);
        assert_eq!(args.mqtt_port, 1883);
        assert_eq!(args.topic_root, "chain");
        assert_eq!(args.time_zone, chrono_tz::America::New_York);
        assert_eq!(args.rollup_batch, 512);
    }

    #[test]
    fn test_time_zone_flag() {
        let args = Args::parse_from(["chain-api", "--time-zone", "Europe/Berlin"]);
        assert_eq!(Settings::from(&args).time_zone, chrono_tz::Europe::Berlin);
        assert!(Args::try_parse_from(["chain-api", "--time-zone", "Mars/Olympus"]).is_err());
    }
}
