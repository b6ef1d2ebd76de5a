use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info};

use crate::publish::{PublishError, Publisher};

const REQUEST_CAPACITY: usize = 10_000;

/// Publishes change frames to `<topic_root>/<topic>` at QoS 0.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic_root: String,
}

impl MqttPublisher {
    /// Creates the client and spawns the task driving its event loop. The
    /// loop reconnects on its own; sends made while disconnected are queued
    /// up to the request capacity and then refused.
    pub fn connect(broker: &str, port: u16, client_id: String, topic_root: String) -> Self {
        info!("Connecting to MQTT broker at {}:{}", broker, port);

        let mut mqtt_options = MqttOptions::new(client_id, broker, port);
        mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(notification) => {
                        debug!("MQTT event: {:?}", notification);
                    }
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        // rumqttc reconnects on the next poll
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic_root }
    }

    fn full_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.topic_root.trim_end_matches('/'), topic)
    }
}

impl Publisher for MqttPublisher {
    fn send(&self, topic: &str, frame: &str) -> Result<(), PublishError> {
        self.client.try_publish(
            self.full_topic(topic),
            QoS::AtMostOnce,
            false,
            frame.as_bytes().to_vec(),
        )?;
        Ok(())
    }
}
