mod broker;
mod reconnect;
mod topic;

pub use broker::{
    log_connection_transitions, ConnectionState, MqttBrokerTransport, MqttPublisher,
};
pub use reconnect::ReconnectPolicy;
pub use topic::{control_topic, data_topic};
