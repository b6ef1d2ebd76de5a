mod event;

use chrono::Utc;
use clap::Parser;
use event::ChangeEvent;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chain-listener")]
#[command(about = "Follows the change notifications published by chain-api", long_about = None)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    /// Topic prefix the API publishes under
    #[arg(long, env = "TOPIC_ROOT", default_value = "chain")]
    topic_root: String,

    /// Only follow one stream, e.g. `site-1`
    #[arg(long)]
    stream: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let root = args.topic_root.trim_end_matches('/');
    let filter = match &args.stream {
        Some(stream) => format!("{}/{}", root, stream),
        None => format!("{}/#", root),
    };

    info!("Starting Chain listener");
    info!("Broker: {}:{}, subscription: {}", args.mqtt_broker, args.mqtt_port, filter);

    let client_id = format!("chain-listener-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.mqtt_broker, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    let mut received = 0u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker, subscribing to {}", filter);
                // Subscriptions do not survive a reconnect with a clean session.
                if let Err(e) = client.subscribe(&filter, QoS::AtMostOnce).await {
                    error!("Failed to subscribe: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                received += 1;
                match ChangeEvent::parse(&publish.payload) {
                    Some(event) => info!(
                        "[{}] {} change: {}{}",
                        Utc::now().format("%H:%M:%S%.3f"),
                        event.stream.kind(),
                        event.href().unwrap_or("-"),
                        event
                            .value()
                            .map(|v| format!(" = {}", v))
                            .unwrap_or_default()
                    ),
                    None => warn!("Unparsable frame on {}", publish.topic),
                }
                if received % 1000 == 0 {
                    info!("Received {} frames", received);
                }
            }
            Ok(notification) => {
                debug!("MQTT event: {:?}", notification);
            }
            Err(e) => {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
