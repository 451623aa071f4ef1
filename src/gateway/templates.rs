//! Canned command templates shown in the lab terminal.
//!
//! `${NAME}` placeholders are filled in by the browser before the command is
//! sent back for execution; the templates themselves are static data.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandTemplate {
    pub name: &'static str,
    pub command: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub variables: &'static [&'static str],
}

const fn template(
    name: &'static str,
    command: &'static str,
    description: &'static str,
    variables: &'static [&'static str],
) -> CommandTemplate {
    CommandTemplate {
        name,
        command,
        description,
        variables,
    }
}

const KAFKA: &[CommandTemplate] = &[
    template(
        "List Topics",
        "docker exec -it kafka-xray-broker kafka-topics --list --bootstrap-server localhost:9092",
        "List all Kafka topics",
        &[],
    ),
    template(
        "Create Topic",
        "docker exec -it kafka-xray-broker kafka-topics --create --topic ${TOPIC_NAME} --bootstrap-server localhost:9092 --partitions 3 --replication-factor 1",
        "Create a new Kafka topic",
        &["TOPIC_NAME"],
    ),
    template(
        "Describe Topic",
        "docker exec -it kafka-xray-broker kafka-topics --describe --topic ${TOPIC_NAME} --bootstrap-server localhost:9092",
        "Get detailed information about a topic",
        &["TOPIC_NAME"],
    ),
    template(
        "Produce Messages",
        "docker exec -it kafka-xray-broker kafka-console-producer --topic ${TOPIC_NAME} --bootstrap-server localhost:9092",
        "Start interactive message producer",
        &["TOPIC_NAME"],
    ),
    template(
        "Consume Messages",
        "docker exec -it kafka-xray-broker kafka-console-consumer --topic ${TOPIC_NAME} --from-beginning --bootstrap-server localhost:9092",
        "Consume messages from beginning",
        &["TOPIC_NAME"],
    ),
];

const JMX: &[CommandTemplate] = &[
    template(
        "JMX Connect",
        "docker exec -it kafka-xray-jmxterm java -jar /jmxterm.jar",
        "Connect to JMX terminal",
        &[],
    ),
    template(
        "Get Broker Metrics",
        "docker exec kafka-xray-jmxterm java -jar /jmxterm.jar -n -i /scripts/broker-metrics.jmx",
        "Fetch broker metrics via JMX",
        &[],
    ),
];

const DOCKER: &[CommandTemplate] = &[
    template(
        "List Containers",
        "docker ps --format \"table {{.Names}}\t{{.Status}}\t{{.Ports}}\"",
        "List running Docker containers",
        &[],
    ),
    template(
        "View Logs",
        "docker logs --tail 50 ${CONTAINER_NAME}",
        "View recent container logs",
        &["CONTAINER_NAME"],
    ),
    template(
        "Container Stats",
        "docker stats --no-stream",
        "Show container resource usage",
        &[],
    ),
];

const MONITORING: &[CommandTemplate] = &[
    template(
        "Test nri-kafka",
        "docker run --rm --network week1-xray_default -v ${PWD}/configs/kafka-config.yml:/etc/newrelic-infra/integrations.d/kafka-config.yml newrelic/nri-kafka:latest --metrics --pretty",
        "Test New Relic Kafka integration",
        &[],
    ),
    template(
        "Check Agent Status",
        "docker logs newrelic-infra --tail 20 | grep -i kafka",
        "Check New Relic agent Kafka status",
        &[],
    ),
];

/// Known template categories.
pub const CATEGORIES: &[&str] = &["kafka", "jmx", "docker", "monitoring"];

/// Templates for `category`; unknown categories have none.
pub fn templates_for(category: &str) -> &'static [CommandTemplate] {
    match category {
        "kafka" => KAFKA,
        "jmx" => JMX,
        "docker" => DOCKER,
        "monitoring" => MONITORING,
        _ => &[],
    }
}
