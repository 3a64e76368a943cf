// Client facade: timeout/abort races, interceptors, trace ids, pub/sub.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use kairo::adapter::{Adapter, AdapterRequest, SubscriberFn, UnsubscribeFn};
use kairo::client::Plugin;
use kairo::error::{ClientError, ClientErrorKind};
use kairo::{ClientConfig, Kairo, KairoClient, LocalAdapter, RequestOptions};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn init_logger() {
    env_logger::try_init_from_env(env_logger::Env::default().default_filter_or("debug"))
        .unwrap_or_else(|_| ());
}

/// Adapter whose requests never settle; the client-side races must win.
struct NeverAdapter;

#[async_trait::async_trait]
impl Adapter for NeverAdapter {
    async fn initialize(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn request(&self, _req: AdapterRequest) -> Result<Value, ClientError> {
        std::future::pending().await
    }

    async fn publish(&self, _channel: &str, _data: Value) -> Result<(), ClientError> {
        Ok(())
    }

    fn subscribe(&self, _channel: &str, _callback: SubscriberFn) -> UnsubscribeFn {
        Box::new(|| {})
    }
}

fn local_client(configure: impl FnOnce(&mut Kairo)) -> KairoClient {
    let mut router = Kairo::new();
    configure(&mut router);
    KairoClient::new(Arc::new(LocalAdapter::new(Arc::new(router))))
}

#[tokio::test]
async fn request_round_trips_through_the_local_adapter() {
    init_logger();
    let client = local_client(|router| {
        router.get("user:[id:number]", |c| async move {
            Ok(json!({ "id": c.param("id").cloned().unwrap_or(Value::Null) }))
        });
    });

    let response = client
        .get("user:7", Value::Null, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.data, json!({ "id": 7 }));
    assert_eq!(response.channel, "user:7");
    assert!(!response.trace_id.is_empty());
    assert!(format!("{:?}", response).contains("user:7"));
}

#[tokio::test]
async fn timeout_rejects_within_a_bounded_margin() {
    init_logger();
    let client = KairoClient::new(Arc::new(NeverAdapter));

    let started = Instant::now();
    let err = client
        .get(
            "slow:endpoint",
            Value::Null,
            RequestOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "TIMEOUT");
    assert_eq!(err.channel.as_deref(), Some("slow:endpoint"));
    assert!(err.trace_id.is_some());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

#[tokio::test]
async fn abort_wins_the_race() {
    init_logger();
    let client = KairoClient::new(Arc::new(NeverAdapter));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = client
        .get("slow:endpoint", Value::Null, RequestOptions::new().abort(token))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ABORTED");
    assert_eq!(err.channel.as_deref(), Some("slow:endpoint"));
}

#[tokio::test]
async fn caller_supplied_trace_id_is_kept_and_propagated() {
    init_logger();
    let client = local_client(|router| {
        router.get("whoami", |c| async move {
            Ok(json!({ "trace": c.trace_id.clone() }))
        });
    });

    let response = client
        .get(
            "whoami",
            Value::Null,
            RequestOptions::new().meta("traceId", json!("trace-123")),
        )
        .await
        .unwrap();
    assert_eq!(response.trace_id, "trace-123");
    // the serving side saw the same id through the metadata
    assert_eq!(response.data, json!({ "trace": "trace-123" }));
}

#[tokio::test]
async fn dispatch_errors_surface_with_codes() {
    init_logger();
    let client = local_client(|router| {
        router.get("known", |_c| async move { Ok(Value::Null) });
    });

    let err = client
        .get("unknown:channel", Value::Null, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_MATCH");
    assert!(err.trace_id.is_some());
}

#[tokio::test]
async fn base_channel_prefixes_every_request() {
    init_logger();
    let mut router = Kairo::new();
    router.get("app:ping", |_c| async move { Ok(json!("pong")) });
    let adapter = Arc::new(LocalAdapter::new(Arc::new(router)));

    let client = KairoClient::with_config(
        adapter,
        ClientConfig {
            base_channel: Some("app".to_string()),
            ..ClientConfig::default()
        },
    );

    let response = client
        .get("ping", Value::Null, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.data, json!("pong"));
    assert_eq!(response.channel, "app:ping");
}

#[tokio::test]
async fn interceptors_transform_request_response_and_error() {
    init_logger();
    let mut client = local_client(|router| {
        router.get("echo:[word]", |c| async move {
            Ok(c.param("word").cloned().unwrap_or(Value::Null))
        });
    });

    // request interceptor rewrites the channel
    client.interceptors.request.use_fn(|mut config| async move {
        config.channel = config.channel.replace("hi", "hello");
        Ok(config)
    });
    // response interceptor wraps the data
    client.interceptors.response.use_fn(|mut response| async move {
        response.data = json!({ "wrapped": response.data.clone() });
        Ok(response)
    });
    // error interceptor re-tags the kind but the call still rejects
    client.interceptors.error.use_fn(|mut err| async move {
        err.kind = ClientErrorKind::Internal("rewritten".to_string());
        err
    });

    let response = client
        .get("echo:hi", Value::Null, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.data, json!({ "wrapped": "hello" }));

    let err = client
        .get("missing:route", Value::Null, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
}

#[tokio::test]
async fn emit_is_fire_and_forget() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let client = local_client(move |router| {
        router.on("audit:event", move |_c| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
    });

    client
        .emit("audit:event", json!({"kind": "login"}), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn publish_fans_out_to_every_subscriber() {
    init_logger();
    let client = local_client(|_router| {});

    let seen_a = Arc::new(AtomicUsize::new(0));
    let seen_b = Arc::new(AtomicUsize::new(0));

    let a = seen_a.clone();
    let sub_a = client.subscribe("news:tech", move |_data| {
        let a = a.clone();
        async move {
            a.fetch_add(1, Ordering::SeqCst);
        }
    });
    let b = seen_b.clone();
    let _sub_b = client.subscribe("news:tech", move |_data| {
        let b = b.clone();
        async move {
            b.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.publish("news:tech", json!("headline")).await;
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 1);

    sub_a.unsubscribe();
    client.publish("news:tech", json!("again")).await;
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 2);

    client.unsubscribe_all("news:tech");
    assert_eq!(client.subscriber_count("news:tech"), 0);
    client.publish("news:tech", json!("silence")).await;
    assert_eq!(seen_b.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn broadcast_reaches_subscribers_through_the_adapter() {
    init_logger();
    let router = Arc::new(Kairo::new());
    let adapter = Arc::new(LocalAdapter::new(router));
    let client = KairoClient::new(adapter);

    let seen = Arc::new(AtomicUsize::new(0));
    let counted = seen.clone();
    let _sub = client.subscribe("alerts", move |_data| {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.broadcast("alerts", json!("fire")).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn plugins_install_onto_the_client() {
    init_logger();

    struct StampPlugin;

    impl Plugin for StampPlugin {
        fn install(&self, client: &mut KairoClient) {
            client.interceptors.request.use_fn(|mut config| async move {
                config
                    .metadata
                    .insert("stamped".to_string(), json!(true));
                Ok(config)
            });
        }
    }

    let mut client = local_client(|router| {
        router.get("inspect", |c| async move {
            Ok(c.meta("stamped").cloned().unwrap_or(Value::Null))
        });
    });
    client.use_plugin(&StampPlugin);

    let response = client
        .get("inspect", Value::Null, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.data, json!(true));
}

#[tokio::test]
async fn disposed_adapter_reports_an_adapter_error() {
    init_logger();
    let router = Arc::new(Kairo::new());
    let adapter = Arc::new(LocalAdapter::new(router));
    adapter.dispose().await.unwrap();

    let client = KairoClient::new(adapter);
    let err = client
        .get("any:channel", Value::Null, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ADAPTER");
}

/// Adapter answering every request with an error envelope.
struct EnvelopeAdapter;

#[async_trait::async_trait]
impl Adapter for EnvelopeAdapter {
    async fn initialize(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn request(&self, _req: AdapterRequest) -> Result<Value, ClientError> {
        Ok(json!({
            "$error": { "code": "ADAPTER", "message": "endpoint destroyed" }
        }))
    }

    async fn publish(&self, _channel: &str, _data: Value) -> Result<(), ClientError> {
        Ok(())
    }

    fn subscribe(&self, _channel: &str, _callback: SubscriberFn) -> UnsubscribeFn {
        Box::new(|| {})
    }
}

#[tokio::test]
async fn adapter_error_envelopes_are_rethrown_as_typed_errors() {
    init_logger();
    let client = KairoClient::new(Arc::new(EnvelopeAdapter));

    let err = client
        .get("remote:thing", Value::Null, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ADAPTER");
    assert_eq!(err.channel.as_deref(), Some("remote:thing"));
    assert!(err.trace_id.is_some());
    assert!(matches!(err.kind, ClientErrorKind::Adapter(ref m) if m == "endpoint destroyed"));
}

#[tokio::test]
async fn response_reports_a_plausible_duration() {
    init_logger();
    let client = local_client(|router| {
        router.get("slowish", |_c| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Value::Null)
        });
    });

    let response = client
        .get("slowish", Value::Null, RequestOptions::new())
        .await
        .unwrap();
    assert!(response.duration >= Duration::from_millis(20));
}
