use crate::backend::BackendError;
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use k8s_openapi::api::core::v1::Service;
use tracing::debug;
use url::Url;

pub const INGRESS_GATEWAY_NAME: &str = "istio-ingressgateway";
pub const INGRESS_GATEWAY_NAMESPACE: &str = "istio-system";
const HTTP_PORT: i32 = 80;

/// Resolves the cluster ingress: the load balancer ip, or the first node address for clusters
/// without one, together with the node port that serves plain http.
pub fn discover_endpoint(k8s_client: &SyncK8sClient) -> Result<Url, BackendError> {
    let gateway = k8s_client
        .get_service(INGRESS_GATEWAY_NAMESPACE, INGRESS_GATEWAY_NAME)?
        .ok_or_else(|| {
            BackendError::Endpoint(format!(
                "service {INGRESS_GATEWAY_NAMESPACE}/{INGRESS_GATEWAY_NAME} not found"
            ))
        })?;

    let node_port = http_node_port(&gateway)?;
    let ip = match load_balancer_ip(&gateway) {
        Some(ip) => ip,
        None => {
            debug!("ingress gateway has no load balancer, using the first node address");
            first_node_address(k8s_client)?
        }
    };

    Url::parse(&format!("http://{ip}:{node_port}"))
        .map_err(|err| BackendError::Endpoint(err.to_string()))
}

fn http_node_port(gateway: &Service) -> Result<i32, BackendError> {
    gateway
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|port| port.port == HTTP_PORT))
        .and_then(|port| port.node_port)
        .ok_or_else(|| {
            BackendError::Endpoint(format!("ingress gateway exposes no node port for {HTTP_PORT}"))
        })
}

fn load_balancer_ip(gateway: &Service) -> Option<String> {
    gateway
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|ingress| ingress.ip.clone())
}

fn first_node_address(k8s_client: &SyncK8sClient) -> Result<String, BackendError> {
    k8s_client
        .list_nodes()?
        .into_iter()
        .next()
        .and_then(|node| node.status)
        .and_then(|status| status.addresses)
        .and_then(|addresses| addresses.into_iter().next())
        .map(|address| address.address)
        .ok_or_else(|| BackendError::Endpoint("no node address available".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::client::MockSyncK8sClient;
    use crate::k8s::Error as K8sError;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::Node;
    use mockall::predicate::eq;
    use serde_json::json;

    fn gateway(load_balancer_ip: Option<&str>) -> Service {
        let ingress = match load_balancer_ip {
            Some(ip) => json!([{ "ip": ip }]),
            None => json!(null),
        };
        serde_json::from_value(json!({
            "metadata": { "name": INGRESS_GATEWAY_NAME },
            "spec": {
                "ports": [
                    { "name": "http2", "port": 80, "nodePort": 31380 },
                    { "name": "https", "port": 443, "nodePort": 31390 },
                ],
            },
            "status": { "loadBalancer": { "ingress": ingress } },
        }))
        .unwrap()
    }

    fn node(address: &str) -> Node {
        serde_json::from_value(json!({
            "metadata": { "name": "node-1" },
            "status": { "addresses": [{ "type": "InternalIP", "address": address }] },
        }))
        .unwrap()
    }

    #[test]
    fn load_balancer_ip_with_node_port() {
        let mut k8s_client = MockSyncK8sClient::default();
        k8s_client
            .expect_get_service()
            .with(eq(INGRESS_GATEWAY_NAMESPACE), eq(INGRESS_GATEWAY_NAME))
            .times(1)
            .returning(|_, _| Ok(Some(gateway(Some("203.0.113.10")))));
        k8s_client.expect_list_nodes().never();

        assert_eq!(
            discover_endpoint(&k8s_client).unwrap(),
            Url::parse("http://203.0.113.10:31380").unwrap()
        );
    }

    #[test]
    fn node_address_without_load_balancer() {
        let mut k8s_client = MockSyncK8sClient::default();
        k8s_client
            .expect_get_service()
            .returning(|_, _| Ok(Some(gateway(None))));
        k8s_client
            .expect_list_nodes()
            .times(1)
            .returning(|| Ok(vec![node("192.168.49.2")]));

        assert_eq!(
            discover_endpoint(&k8s_client).unwrap(),
            Url::parse("http://192.168.49.2:31380").unwrap()
        );
    }

    #[test]
    fn missing_gateway() {
        let mut k8s_client = MockSyncK8sClient::default();
        k8s_client.expect_get_service().returning(|_, _| Ok(None));

        assert_matches!(
            discover_endpoint(&k8s_client),
            Err(BackendError::Endpoint(_))
        );
    }

    #[test]
    fn cluster_errors_are_propagated() {
        let mut k8s_client = MockSyncK8sClient::default();
        k8s_client
            .expect_get_service()
            .returning(|_, name| {
                Err(K8sError::from_kube(
                    kube::Error::Api(kube::core::ErrorResponse {
                        status: "Failure".to_string(),
                        message: "forbidden".to_string(),
                        reason: "Forbidden".to_string(),
                        code: 403,
                    }),
                    name,
                ))
            });

        assert_matches!(discover_endpoint(&k8s_client), Err(BackendError::K8s(_)));
    }
}
