//! 事件源模块
//!
//! 调度器只依赖 [`EventSource`]：订阅后得到一个不断产出对象快照的流。
//! 基于集群的实现 [`KubeEventSource`] 使用 kube 的 `watcher` 做列举 + 监听，
//! 监听断开后从上次的 resourceVersion 续接，出错时按默认退避策略重试。
//! 列举/监听到的对象同时写入本地缓存，每个重新同步周期从缓存重新投递一次，
//! 不会为此重新列举集群。
//!
//! 默认情况下未完成初始化的对象对列举/监听不可见，
//! [`include_uninitialized_layer`] 作为客户端中间件为每个 GET 请求追加
//! `includeUninitialized=true`。

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use hyper::Body;
use kube::api::Api;
use kube::client::ClientBuilder;
use kube::runtime::reflector::{self, store::Writer};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use sa_injector_common::{Error, Result};
use std::marker::PhantomData;
use std::time::Duration;
use tower::util::MapRequestLayer;
use tracing::{debug, info, warn};

use crate::resources::Workload;

/// 对象快照流
pub type EventStream<K> = BoxStream<'static, Result<K>>;

/// 包含未初始化对象的查询参数
const INCLUDE_UNINITIALIZED: &str = "includeUninitialized=true";

/// 事件源
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 事件携带的对象类型
    type Object: Send + 'static;

    /// 建立订阅
    ///
    /// 初次列举失败时返回错误；订阅建立后的失败以流中的错误项出现，流本身继续。
    async fn subscribe(&self) -> Result<EventStream<Self::Object>>;
}

/// 追加 `includeUninitialized=true` 的客户端中间件
pub type IncludeUninitializedLayer = MapRequestLayer<fn(http::Request<Body>) -> http::Request<Body>>;

/// 创建追加 `includeUninitialized=true` 的中间件
pub fn include_uninitialized_layer() -> IncludeUninitializedLayer {
    MapRequestLayer::new(include_uninitialized::<Body> as fn(http::Request<Body>) -> http::Request<Body>)
}

/// 创建列举/监听时包含未初始化对象的客户端
pub fn uninitialized_client(config: Config) -> Result<Client> {
    let builder = ClientBuilder::try_from(config)
        .map_err(|e| Error::Watch(format!("创建 Kubernetes 客户端失败: {e}")))?;
    Ok(builder.with_layer(&include_uninitialized_layer()).build())
}

/// 只改写 GET 请求，补丁等写请求原样发送
fn include_uninitialized<B>(mut request: http::Request<B>) -> http::Request<B> {
    if request.method() != http::Method::GET {
        return request;
    }

    let uri = request.uri().to_string();
    let separator = match uri.find('?') {
        None => "?",
        Some(at) if at + 1 == uri.len() => "",
        Some(_) => "&",
    };

    match format!("{uri}{separator}{INCLUDE_UNINITIALIZED}").parse::<http::Uri>() {
        Ok(rewritten) => *request.uri_mut() = rewritten,
        Err(e) => warn!(%uri, error = %e, "无法追加 includeUninitialized"),
    }
    request
}

/// 基于 kube watcher 的事件源，覆盖所有命名空间
pub struct KubeEventSource<K> {
    /// Kubernetes 客户端，应带有 [`include_uninitialized_layer`]
    client: Client,
    /// 从缓存重新投递的周期
    resync_period: Duration,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Workload> KubeEventSource<K> {
    /// 创建新的事件源
    pub fn new(client: Client, resync_period: Duration) -> Self {
        Self {
            client,
            resync_period,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: Workload> EventSource for KubeEventSource<K> {
    type Object = K;

    async fn subscribe(&self) -> Result<EventStream<K>> {
        let api: Api<K> = Api::all(self.client.clone());
        let mut events = watcher(api, watcher::Config::default()).boxed();

        // 首个事件是初次列举的结果
        let first = match events.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Err(Error::Watch(format!("列举 {} 失败: {e}", K::LABEL))),
            None => return Err(Error::Watch(format!("{} 事件流在初次列举前结束", K::LABEL))),
        };
        info!(
            kind = K::LABEL,
            resync_secs = self.resync_period.as_secs(),
            "已建立列举/监听订阅"
        );

        let writer = Writer::<K>::default();
        let store = writer.as_reader();

        let applied = reflector::reflector(
            writer,
            stream::once(future::ready(Ok(first))).chain(events).default_backoff(),
        )
        .applied_objects()
        .map_err(|e| Error::Watch(e.to_string()));

        let period = self.resync_period;
        let resync = stream::unfold(store, move |store| async move {
            tokio::time::sleep(period).await;
            let objects: Vec<Result<K>> = store.state().iter().map(|object| Ok(K::clone(object))).collect();
            debug!(kind = K::LABEL, count = objects.len(), "从缓存重新投递");
            Some((stream::iter(objects), store))
        })
        .flatten();

        Ok(stream::select(applied, resync).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::InitializingPod;
    use kube::ResourceExt;
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tower::{service_fn, ServiceBuilder};

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;
    type Respond = fn(usize) -> http::Response<Body>;

    /// 假 API 收到的请求
    #[derive(Clone, Default)]
    struct Calls {
        lists: Arc<AtomicUsize>,
        watches: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<String>>>,
    }

    impl Calls {
        fn lists(&self) -> usize {
            self.lists.load(Ordering::SeqCst)
        }

        fn watches(&self) -> usize {
            self.watches.load(Ordering::SeqCst)
        }
    }

    /// 按请求类型和序号应答的客户端，经过与生产相同的中间件
    fn fake_client(calls: Calls, list: Respond, watch: Respond) -> Client {
        let service = service_fn(move |request: http::Request<Body>| {
            let calls = calls.clone();
            async move {
                let query = request.uri().query().unwrap_or_default().to_string();
                calls.queries.lock().unwrap().push(query.clone());
                let response = if query.contains("watch=true") {
                    watch(calls.watches.fetch_add(1, Ordering::SeqCst))
                } else {
                    list(calls.lists.fetch_add(1, Ordering::SeqCst))
                };
                Ok::<_, Infallible>(response)
            }
        });

        Client::new(
            ServiceBuilder::new().layer(include_uninitialized_layer()).service(service),
            "default",
        )
    }

    fn pod(name: &str, version: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "default", "resourceVersion": version}
        })
    }

    fn status(message: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": "InternalError",
            "code": 500
        })
    }

    fn json_response(code: u16, body: Value) -> http::Response<Body> {
        http::Response::builder()
            .status(code)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn pod_list(items: Vec<Value>) -> http::Response<Body> {
        json_response(
            200,
            json!({"apiVersion": "v1", "kind": "PodList", "metadata": {"resourceVersion": "1"}, "items": items}),
        )
    }

    fn watch_line(kind: &str, object: Value) -> Chunk {
        let mut line = serde_json::to_vec(&json!({"type": kind, "object": object})).unwrap();
        line.push(b'\n');
        Ok(line)
    }

    /// 发送给定事件后保持连接
    fn open_watch(lines: Vec<Chunk>) -> http::Response<Body> {
        http::Response::new(Body::wrap_stream(stream::iter(lines).chain(stream::pending())))
    }

    /// 发送给定事件后关闭连接
    fn closed_watch(lines: Vec<Chunk>) -> http::Response<Body> {
        http::Response::new(Body::wrap_stream(stream::iter(lines)))
    }

    async fn names(events: EventStream<InitializingPod>, count: usize) -> Vec<String> {
        let items = events.take(count).map(|event| event.unwrap().name_any()).collect();
        tokio::time::timeout(Duration::from_secs(10), items).await.unwrap()
    }

    #[test]
    fn test_get_without_query() {
        let request = http::Request::get("/api/v1/pods").body(()).unwrap();
        let request = include_uninitialized(request);
        assert_eq!(request.uri().to_string(), "/api/v1/pods?includeUninitialized=true");
    }

    #[test]
    fn test_get_with_empty_query() {
        let request = http::Request::get("/api/v1/pods?").body(()).unwrap();
        let request = include_uninitialized(request);
        assert_eq!(request.uri().to_string(), "/api/v1/pods?includeUninitialized=true");
    }

    #[test]
    fn test_get_keeps_existing_params() {
        let request = http::Request::get("/apis/apps/v1/deployments?watch=true&resourceVersion=42")
            .body(())
            .unwrap();
        let request = include_uninitialized(request);
        assert_eq!(
            request.uri().query(),
            Some("watch=true&resourceVersion=42&includeUninitialized=true")
        );
    }

    #[test]
    fn test_patch_left_alone() {
        let request = http::Request::patch("/api/v1/namespaces/default/pods/foo?fieldManager=sa-injector")
            .body(())
            .unwrap();
        let request = include_uninitialized(request);
        assert_eq!(request.uri().query(), Some("fieldManager=sa-injector"));
    }

    #[tokio::test]
    async fn test_list_items_precede_watch_events() {
        let calls = Calls::default();
        let client = fake_client(
            calls.clone(),
            |_| pod_list(vec![pod("a", "1")]),
            |_| open_watch(vec![watch_line("ADDED", pod("b", "2"))]),
        );

        let source = KubeEventSource::<InitializingPod>::new(client, Duration::from_secs(3600));
        let events = source.subscribe().await.unwrap();

        assert_eq!(names(events, 2).await, ["a", "b"]);
        let queries = calls.queries.lock().unwrap();
        assert!(!queries.is_empty());
        assert!(queries.iter().all(|q| q.contains("includeUninitialized=true")));
    }

    #[tokio::test]
    async fn test_initial_list_failure_is_returned() {
        let calls = Calls::default();
        let client = fake_client(
            calls.clone(),
            |_| json_response(500, status("etcd unavailable")),
            |_| open_watch(vec![]),
        );

        let source = KubeEventSource::<InitializingPod>::new(client, Duration::from_secs(3600));
        let result = source.subscribe().await;

        assert!(matches!(result, Err(Error::Watch(_))));
        assert_eq!(calls.watches(), 0);
    }

    #[tokio::test]
    async fn test_watch_error_surfaces_and_stream_continues() {
        let calls = Calls::default();
        let client = fake_client(
            calls.clone(),
            |_| pod_list(vec![pod("a", "1")]),
            |n| match n {
                0 => closed_watch(vec![watch_line("ERROR", status("etcd leader changed"))]),
                _ => open_watch(vec![watch_line("ADDED", pod("b", "2"))]),
            },
        );

        let source = KubeEventSource::<InitializingPod>::new(client, Duration::from_secs(3600));
        let events = source.subscribe().await.unwrap();
        let items: Vec<_> = tokio::time::timeout(Duration::from_secs(10), events.take(3).collect::<Vec<_>>())
            .await
            .unwrap();

        assert!(matches!(&items[0], Ok(p) if p.name_any() == "a"));
        assert!(matches!(&items[1], Err(Error::Watch(_))));
        assert!(matches!(&items[2], Ok(p) if p.name_any() == "b"));
        assert_eq!(calls.lists(), 1);
    }

    #[tokio::test]
    async fn test_resync_redelivers_cached_objects_without_relisting() {
        let calls = Calls::default();
        let client = fake_client(calls.clone(), |_| pod_list(vec![pod("a", "1")]), |_| open_watch(vec![]));

        let source = KubeEventSource::<InitializingPod>::new(client, Duration::from_millis(50));
        let events = source.subscribe().await.unwrap();

        assert_eq!(names(events, 3).await, ["a", "a", "a"]);
        assert_eq!(calls.lists(), 1);
    }

    #[tokio::test]
    async fn test_closed_watch_resumes_without_relisting() {
        let calls = Calls::default();
        let client = fake_client(
            calls.clone(),
            |_| pod_list(vec![]),
            |_| {
                http::Response::new(Body::wrap_stream(stream::once(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, std::io::Error>(Vec::new())
                })))
            },
        );

        let source = KubeEventSource::<InitializingPod>::new(client, Duration::from_secs(3600));
        let events = source.subscribe().await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(300), events.for_each(|_| future::ready(()))).await;

        assert_eq!(calls.lists(), 1);
        assert!(calls.watches() >= 2);
    }
}
