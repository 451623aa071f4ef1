//! Status queries for dashboards
//!
//! Both functions never fail: a runtime error is folded into the payload
//! (`running: false` with an error message, or an empty cluster list).

use std::collections::BTreeMap;

use tracing::warn;

use super::types::{ClusterMember, ContainerInfo, ContainerRuntime, DockerStatus, KafkaCluster};

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const KAFKA_SERVICES: &[&str] = &["kafka", "broker"];

/// Engine version and running containers.
pub async fn docker_status(runtime: &dyn ContainerRuntime) -> DockerStatus {
    let result = async {
        runtime.ping().await?;
        let version = runtime.version().await?;
        let containers = runtime.list_containers().await?;
        Ok::<_, super::types::RuntimeError>((version, containers))
    }
    .await;

    match result {
        Ok((version, containers)) => DockerStatus {
            running: true,
            version: Some(version),
            containers: Some(containers.len()),
            container_details: Some(containers),
            error: None,
        },
        Err(e) => {
            warn!(runtime = runtime.name(), error = %e, "Docker status query failed");
            DockerStatus {
                running: false,
                version: None,
                containers: None,
                container_details: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Running Kafka brokers grouped by compose project.
pub async fn kafka_clusters(runtime: &dyn ContainerRuntime) -> Vec<KafkaCluster> {
    match runtime.list_containers().await {
        Ok(containers) => group_kafka_clusters(&containers),
        Err(e) => {
            warn!(runtime = runtime.name(), error = %e, "Kafka cluster query failed");
            Vec::new()
        }
    }
}

/// Keep containers whose compose service is a Kafka broker and group them
/// by compose project (`"default"` when unlabelled). Clusters are sorted by
/// name.
pub fn group_kafka_clusters(containers: &[ContainerInfo]) -> Vec<KafkaCluster> {
    let mut clusters: BTreeMap<String, Vec<ClusterMember>> = BTreeMap::new();
    for container in containers {
        let is_kafka = container
            .labels
            .get(COMPOSE_SERVICE_LABEL)
            .is_some_and(|service| KAFKA_SERVICES.contains(&service.as_str()));
        if !is_kafka {
            continue;
        }
        let project = container
            .labels
            .get(COMPOSE_PROJECT_LABEL)
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        clusters.entry(project).or_default().push(ClusterMember {
            name: container.name.clone(),
            id: container.id.clone(),
            status: container.status.clone(),
            ports: container.ports.clone(),
        });
    }
    clusters
        .into_iter()
        .map(|(name, containers)| KafkaCluster { name, containers })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{MockContainerRuntime, RuntimeError};
    use std::collections::HashMap;

    fn container(name: &str, labels: &[(&str, &str)]) -> ContainerInfo {
        ContainerInfo {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: "confluentinc/cp-kafka".to_string(),
            state: "running".to_string(),
            status: "Up".to_string(),
            ports: vec![],
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_group_by_project() {
        let containers = vec![
            container(
                "w1-kafka",
                &[(COMPOSE_SERVICE_LABEL, "kafka"), (COMPOSE_PROJECT_LABEL, "week1")],
            ),
            container(
                "w1-broker2",
                &[(COMPOSE_SERVICE_LABEL, "broker"), (COMPOSE_PROJECT_LABEL, "week1")],
            ),
            container("loose-kafka", &[(COMPOSE_SERVICE_LABEL, "kafka")]),
            container("grafana", &[(COMPOSE_SERVICE_LABEL, "grafana")]),
            container("unlabelled", &[]),
        ];
        let clusters = group_kafka_clusters(&containers);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].name, "default");
        assert_eq!(clusters[0].containers[0].name, "loose-kafka");
        assert_eq!(clusters[1].name, "week1");
        assert_eq!(clusters[1].containers.len(), 2);
    }

    #[tokio::test]
    async fn test_docker_status_running() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_ping().returning(|| Ok(()));
        mock.expect_version().returning(|| Ok("24.0.7".to_string()));
        mock.expect_list_containers()
            .returning(|| Ok(vec![container("kafka-xray-broker", &[])]));

        let status = docker_status(&mock).await;
        assert!(status.running);
        assert_eq!(status.version.as_deref(), Some("24.0.7"));
        assert_eq!(status.containers, Some(1));
    }

    #[tokio::test]
    async fn test_docker_status_unreachable() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_name().return_const("cli");
        mock.expect_ping()
            .returning(|| Err(RuntimeError::NotAvailable("docker.exe not found".into())));

        let status = docker_status(&mock).await;
        assert!(!status.running);
        assert!(status.error.unwrap().contains("docker.exe not found"));
        assert!(status.container_details.is_none());
    }

    #[tokio::test]
    async fn test_kafka_clusters_error_is_empty() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_name().return_const("daemon");
        mock.expect_list_containers()
            .returning(|| Err(RuntimeError::RequestFailed("boom".into())));
        assert!(kafka_clusters(&mock).await.is_empty());
    }
}
