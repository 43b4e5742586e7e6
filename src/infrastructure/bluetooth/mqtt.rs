//! UART to MQTT bridge
//!
//! Mirrors UART traffic to MQTT topics and turns messages from the
//! subscribed topic into consumer events and, optionally, UART writes. The
//! MQTT client itself lives behind [`MqttSink`].

use crate::domain::models::AppEvent;
use crate::domain::settings::{MqttQos, MqttSettings, PublishFeed, SubscribeBehaviour};
use tracing::{debug, trace};

/// Outbound side of an MQTT client.
pub trait MqttSink: Send {
    fn publish(&mut self, topic: &str, payload: &str, qos: MqttQos);
}

pub struct UartMqttBridge {
    settings: MqttSettings,
    sink: Box<dyn MqttSink>,
}

impl UartMqttBridge {
    pub fn new(settings: MqttSettings, sink: Box<dyn MqttSink>) -> Self {
        Self { settings, sink }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Data notified by the peripheral
    pub fn on_received(&mut self, data: &[u8]) {
        self.publish(PublishFeed::Rx, data);
    }

    /// Data written to the peripheral
    pub fn on_sent(&mut self, data: &[u8]) {
        self.publish(PublishFeed::Tx, data);
    }

    /// Handles a message from the broker. Returns the bytes to transmit to
    /// the peripheral, if any, alongside the event for the consumer.
    pub fn on_message(&mut self, topic: &str, payload: &str) -> (AppEvent, Option<Vec<u8>>) {
        let event = AppEvent::MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        let subscribed = self.settings.subscribe_enabled
            && self.settings.subscribe_topic.as_deref() == Some(topic);
        if !subscribed {
            debug!("MQTT message on unsubscribed topic {}", topic);
            return (event, None);
        }
        let transmit = match self.settings.subscribe_behaviour {
            SubscribeBehaviour::Transmit => Some(payload.as_bytes().to_vec()),
            SubscribeBehaviour::LocalOnly => None,
        };
        (event, transmit)
    }

    fn publish(&mut self, feed: PublishFeed, data: &[u8]) {
        if !self.settings.publish_enabled {
            return;
        }
        let Some((topic, qos)) = self.settings.publish_topic(feed) else {
            return;
        };
        let payload = String::from_utf8_lossy(data);
        trace!("MQTT publish {} ({:?}): {}", topic, qos, payload);
        self.sink.publish(topic, &payload, qos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Published = Arc<Mutex<Vec<(String, String, MqttQos)>>>;

    struct RecordingSink(Published);

    impl MqttSink for RecordingSink {
        fn publish(&mut self, topic: &str, payload: &str, qos: MqttQos) {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string(), qos));
        }
    }

    fn new_bridge(settings: MqttSettings) -> (UartMqttBridge, Published) {
        let published = Published::default();
        let sink = Box::new(RecordingSink(published.clone()));
        (UartMqttBridge::new(settings, sink), published)
    }

    fn configured() -> MqttSettings {
        MqttSettings {
            rx_publish_topic: Some("user/feeds/rx".into()),
            tx_publish_topic: Some("user/feeds/tx".into()),
            tx_publish_qos: MqttQos::AtLeastOnce,
            subscribe_topic: Some("user/feeds/cmd".into()),
            ..MqttSettings::default()
        }
    }

    #[test]
    fn test_publishes_both_directions() {
        let (mut bridge, published) = new_bridge(configured());
        bridge.on_received(b"temp=21");
        bridge.on_sent(b"led on");

        assert_eq!(
            *published.lock().unwrap(),
            vec![
                ("user/feeds/rx".to_string(), "temp=21".to_string(), MqttQos::AtMostOnce),
                ("user/feeds/tx".to_string(), "led on".to_string(), MqttQos::AtLeastOnce),
            ]
        );
    }

    #[test]
    fn test_publishing_disabled_or_unconfigured() {
        let mut settings = configured();
        settings.publish_enabled = false;
        let (mut bridge, published) = new_bridge(settings);
        bridge.on_received(b"x");
        assert!(published.lock().unwrap().is_empty());

        let (mut bridge, published) = new_bridge(MqttSettings::default());
        bridge.on_sent(b"x");
        assert!(published.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscribe_behaviour() {
        let (mut bridge, _) = new_bridge(configured());
        let (event, transmit) = bridge.on_message("user/feeds/cmd", "blink");
        assert_eq!(
            event,
            AppEvent::MqttMessage {
                topic: "user/feeds/cmd".into(),
                payload: "blink".into(),
            }
        );
        assert_eq!(transmit, None);

        let mut settings = configured();
        settings.subscribe_behaviour = SubscribeBehaviour::Transmit;
        let (mut bridge, _) = new_bridge(settings);
        assert_eq!(
            bridge.on_message("user/feeds/cmd", "blink").1,
            Some(b"blink".to_vec())
        );
        // Other topics are reported but never transmitted
        assert_eq!(bridge.on_message("user/feeds/other", "blink").1, None);
    }
}
