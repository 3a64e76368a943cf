// Pipeline order: validation, guards, middleware chain, terminal handler.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use ahash::AHashMap as Map;
use kairo::error::RouterError;
use kairo::{Kairo, Method, RouteOptions};
use serde_json::{Value, json};

fn init_logger() {
    env_logger::try_init_from_env(env_logger::Env::default().default_filter_or("debug"))
        .unwrap_or_else(|_| ());
}

fn meta() -> Map<String, Value> {
    Map::default()
}

#[tokio::test]
async fn guard_false_short_circuits_before_the_handler() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut router = Kairo::new();
    let handler_calls = calls.clone();
    router.on_opts(
        "secure:door",
        move |_c| {
            let handler_calls = handler_calls.clone();
            async move {
                handler_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        },
        RouteOptions::new().guard(|_c| async move { Ok(false) }),
    );

    let err = router.emit("secure:door", Value::Null, meta()).await.unwrap_err();
    assert!(matches!(err, RouterError::GuardRejected(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn guards_run_global_first_then_local_in_order() {
    init_logger();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut router = Kairo::new();
    let g1 = order.clone();
    router.guard(move |_c| {
        let g1 = g1.clone();
        async move {
            g1.lock().unwrap().push("global1");
            Ok(true)
        }
    });
    let g2 = order.clone();
    router.guard(move |_c| {
        let g2 = g2.clone();
        async move {
            g2.lock().unwrap().push("global2");
            Ok(true)
        }
    });

    let local = order.clone();
    router.on_opts(
        "task",
        |_c| async move { Ok(Value::Null) },
        RouteOptions::new().guard(move |_c| {
            let local = local.clone();
            async move {
                local.lock().unwrap().push("local");
                Ok(true)
            }
        }),
    );

    router.emit("task", Value::Null, meta()).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["global1", "global2", "local"]);
}

#[tokio::test]
async fn guard_error_propagates_as_hard_failure() {
    init_logger();
    let mut router = Kairo::new();
    router.on_opts(
        "broken",
        |_c| async move { Ok(Value::Null) },
        RouteOptions::new()
            .guard(|_c| async move { Err(RouterError::Handler("guard blew up".to_string())) }),
    );

    let err = router.emit("broken", Value::Null, meta()).await.unwrap_err();
    assert!(matches!(err, RouterError::Handler(_)));
}

#[tokio::test]
async fn middleware_runs_global_then_local_around_the_handler() {
    init_logger();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut router = Kairo::new();
    let a = order.clone();
    router.use_middleware(move |_c, next| {
        let a = a.clone();
        async move {
            a.lock().unwrap().push("A:before");
            let out = next().await;
            a.lock().unwrap().push("A:after");
            out
        }
    });
    let b = order.clone();
    router.use_middleware(move |_c, next| {
        let b = b.clone();
        async move {
            b.lock().unwrap().push("B:before");
            let out = next().await;
            b.lock().unwrap().push("B:after");
            out
        }
    });

    let c = order.clone();
    let h = order.clone();
    router.on_opts(
        "chain",
        move |_c| {
            let h = h.clone();
            async move {
                h.lock().unwrap().push("handler");
                Ok(Value::Null)
            }
        },
        RouteOptions::new().middleware(move |_c, next| {
            let c = c.clone();
            async move {
                c.lock().unwrap().push("C:before");
                let out = next().await;
                c.lock().unwrap().push("C:after");
                out
            }
        }),
    );

    router.emit("chain", Value::Null, meta()).await.unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec![
            "A:before", "B:before", "C:before", "handler", "C:after", "B:after", "A:after",
        ]
    );
}

#[tokio::test]
async fn middleware_may_skip_next_and_answer_itself() {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut router = Kairo::new();
    let handler_calls = calls.clone();
    router.route(
        Method::GET,
        "cached:resource",
        move |_c| {
            let handler_calls = handler_calls.clone();
            async move {
                handler_calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!("fresh"))
            }
        },
        // never calls next: the chain ends here, which is supported
        RouteOptions::new().middleware(|_c, _next| async move { Ok(json!("from-cache")) }),
    );

    let out = router
        .execute(Method::GET, "cached:resource", Value::Null, meta())
        .await
        .unwrap();
    assert_eq!(out, json!("from-cache"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn schema_rejects_before_guards_run() {
    init_logger();
    let guard_calls = Arc::new(AtomicUsize::new(0));

    let mut router = Kairo::new();
    let counted = guard_calls.clone();
    router.on_opts(
        "orders:create",
        |_c| async move { Ok(Value::Null) },
        RouteOptions::new()
            .schema(|payload| {
                if payload.get("amount").is_some() {
                    Ok(())
                } else {
                    Err("amount is required".to_string())
                }
            })
            .guard(move |_c| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            }),
    );

    let err = router
        .emit("orders:create", json!({}), meta())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Validation(_)));
    assert_eq!(guard_calls.load(Ordering::SeqCst), 0);

    router
        .emit("orders:create", json!({"amount": 3}), meta())
        .await
        .unwrap();
    assert_eq!(guard_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn value_controller_bypasses_the_middleware_chain() {
    init_logger();
    let middleware_calls = Arc::new(AtomicUsize::new(0));

    let mut router = Kairo::new();
    let counted = middleware_calls.clone();
    router.use_middleware(move |_c, next| {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            next().await
        }
    });
    router.route_value(Method::GET, "config:version", json!("1.4.2"));

    let out = router
        .execute(Method::GET, "config:version", Value::Null, meta())
        .await
        .unwrap();
    assert_eq!(out, json!("1.4.2"));
    assert_eq!(middleware_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn re_registration_keeps_earlier_guards() {
    init_logger();
    let mut router = Kairo::new();
    router.route(
        Method::GET,
        "doc:[id]",
        |_c| async move { Ok(json!("read")) },
        RouteOptions::new().guard(|_c| async move { Ok(false) }),
    );
    // registering another verb on the same channel must not drop the
    // guards installed by the first registration
    router.post("doc:[id]", |_c| async move { Ok(json!("write")) });

    let err = router
        .execute(Method::GET, "doc:7", Value::Null, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::GuardRejected(_)));

    // node-level guards cover every verb on the channel
    let err = router
        .execute(Method::POST, "doc:7", Value::Null, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::GuardRejected(_)));
}

#[tokio::test]
async fn execute_requires_a_controller_for_the_verb() {
    init_logger();
    let mut router = Kairo::new();
    router.get("user:[id]", |_c| async move { Ok(Value::Null) });

    let err = router
        .execute(Method::POST, "user:7", Value::Null, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoController(Method::POST, _)));

    let err = router
        .execute(Method::GET, "nope", Value::Null, meta())
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoMatch(_)));
}

#[tokio::test]
async fn handler_sees_coerced_params_and_payload() {
    init_logger();
    let mut router = Kairo::new();
    router.get("user:[id:number]", |c| async move {
        let id = c.param("id").cloned().unwrap_or(Value::Null);
        Ok(json!({ "id": id, "echo": c.payload.clone() }))
    });

    let out = router
        .execute(Method::GET, "user:7", json!("hi"), meta())
        .await
        .unwrap();
    assert_eq!(out, json!({ "id": 7, "echo": "hi" }));
}

#[tokio::test]
async fn emit_requires_a_plain_handler() {
    init_logger();
    let mut router = Kairo::new();
    // verb-only endpoint: execute works, emit has nothing to run
    router.get("only:verb", |_c| async move { Ok(Value::Null) });

    let err = router.emit("only:verb", Value::Null, meta()).await.unwrap_err();
    assert!(matches!(err, RouterError::NoMatch(_)));
}

#[tokio::test]
async fn merged_routes_keep_their_source_pipeline() {
    init_logger();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut sub = Kairo::new();
    let sub_mw = order.clone();
    sub.use_middleware(move |_c, next| {
        let sub_mw = sub_mw.clone();
        async move {
            sub_mw.lock().unwrap().push("sub-global");
            next().await
        }
    });
    let h = order.clone();
    sub.on("ping", move |_c| {
        let h = h.clone();
        async move {
            h.lock().unwrap().push("handler");
            Ok(Value::Null)
        }
    });

    let mut router = Kairo::new();
    let host_mw = order.clone();
    router.use_middleware(move |_c, next| {
        let host_mw = host_mw.clone();
        async move {
            host_mw.lock().unwrap().push("host-global");
            next().await
        }
    });
    router.merge(sub, Some("svc"));

    router.emit("svc:ping", Value::Null, meta()).await.unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["host-global", "sub-global", "handler"]
    );
}
