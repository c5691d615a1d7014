use std::time::Duration;

use http::header::PROXY_AUTHORIZATION;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::Result;
use crate::body::ReqBody;
use crate::proxy::{ProxyConfig, ProxyConnector};
use crate::tls::{insecure_client_config, verifying_client_config};

type HyperClient = Client<hyper_rustls::HttpsConnector<ProxyConnector>, ReqBody>;

#[derive(Clone, Debug)]
pub(crate) struct TransportSettings {
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) proxy: ProxyConfig,
    pub(crate) extra_root_pems: Vec<Vec<u8>>,
}

/// Certificate-verifying and insecure clients sharing one proxy setup.
#[derive(Clone)]
pub(crate) struct Transport {
    verified: HyperClient,
    insecure: HyperClient,
    proxy: ProxyConfig,
}

impl Transport {
    pub(crate) fn build(settings: TransportSettings) -> Result<Self> {
        let verified_tls = verifying_client_config(&settings.extra_root_pems)?;
        let insecure_tls = insecure_client_config()?;
        Ok(Self {
            verified: build_hyper_client(verified_tls, &settings),
            insecure: build_hyper_client(insecure_tls, &settings),
            proxy: settings.proxy,
        })
    }

    pub(crate) async fn send(
        &self,
        mut request: Request<ReqBody>,
        insecure: bool,
    ) -> std::result::Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        if let Some(authorization) = self.proxy.forward_authorization(request.uri()) {
            request
                .headers_mut()
                .insert(PROXY_AUTHORIZATION, authorization);
        }
        let client = if insecure {
            &self.insecure
        } else {
            &self.verified
        };
        client.request(request).await
    }
}

fn build_hyper_client(tls_config: rustls::ClientConfig, settings: &TransportSettings) -> HyperClient {
    let connector = ProxyConnector::new(settings.proxy.clone(), settings.connect_timeout);
    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(connector);
    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(settings.pool_idle_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .build(https)
}
