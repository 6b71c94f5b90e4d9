//! Shared informer for dynamically typed resources.
//!
//! `kube_runtime::watcher` does the listing, watching and relisting. This
//! module keeps a local cache on top of it so that every watcher event can be
//! classified as an add, update or delete and fanned out to the registered
//! [`EventHandler`]s.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{pin_mut, Stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, ListParams};
use kube_runtime::watcher;
use log::{debug, info, warn};
use tokio::{
    sync::RwLock,
    time::{self, Duration, Instant, Interval},
};
use tokio_util::sync::CancellationToken;

use crate::{EventHandler, Gvr};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

type Cache = HashMap<String, Arc<DynamicObject>>;

/// Cache key: `namespace/name`, or `name` for cluster scoped objects.
pub fn object_key(meta: &ObjectMeta) -> Option<String> {
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_owned(),
    })
}

/// Read-only view of an informer's cache.
#[derive(Clone, Default)]
pub struct Store {
    cache: Arc<RwLock<Cache>>,
}

impl Store {
    pub async fn get(&self, key: &str) -> Option<Arc<DynamicObject>> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.cache.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

/// Cache plus handler fan-out, independent of where events come from.
#[derive(Default)]
pub(crate) struct Processor {
    store: Store,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    synced: AtomicBool,
}

impl Processor {
    async fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        // Hold the cache lock so no event slips in between replay and registration.
        let cache = self.store.cache.read().await;
        for obj in cache.values() {
            handler.on_add(obj);
        }
        self.handlers.write().await.push(handler);
    }

    async fn process(&self, event: watcher::Event<DynamicObject>) {
        match event {
            watcher::Event::Applied(obj) => {
                let mut cache = self.store.cache.write().await;
                self.upsert(&mut cache, obj).await;
            }
            watcher::Event::Deleted(obj) => {
                let mut cache = self.store.cache.write().await;
                let Some(key) = object_key(&obj.metadata) else {
                    warn!("ignoring delete of object without a name");
                    return;
                };
                if cache.remove(&key).is_some() {
                    self.dispatch(|h| h.on_delete(&obj)).await;
                } else {
                    debug!("delete for unknown object {}", key);
                }
            }
            watcher::Event::Restarted(objs) => {
                let mut cache = self.store.cache.write().await;
                let mut seen = HashSet::with_capacity(objs.len());
                for obj in objs {
                    if let Some(key) = self.upsert(&mut cache, obj).await {
                        seen.insert(key);
                    }
                }

                let gone: Vec<String> = cache.keys().filter(|k| !seen.contains(*k)).cloned().collect();
                for key in gone {
                    if let Some(last) = cache.remove(&key) {
                        self.dispatch(|h| h.on_delete(&last)).await;
                    }
                }

                if !self.synced.swap(true, Ordering::SeqCst) {
                    info!("cache synced with {} objects", cache.len());
                }
            }
        }
    }

    /// Insert or replace `obj`, reporting it as an add or an update.
    async fn upsert(&self, cache: &mut Cache, obj: DynamicObject) -> Option<String> {
        let Some(key) = object_key(&obj.metadata) else {
            warn!("ignoring object without a name");
            return None;
        };
        let new = Arc::new(obj);
        match cache.insert(key.clone(), new.clone()) {
            Some(old) => self.dispatch(|h| h.on_update(&old, &new)).await,
            None => self.dispatch(|h| h.on_add(&new)).await,
        }
        Some(key)
    }

    /// Redeliver every cached object as an update of itself.
    async fn resync(&self) {
        let cache = self.store.cache.read().await;
        debug!("resyncing {} objects", cache.len());
        for obj in cache.values() {
            self.dispatch(|h| h.on_update(obj, obj)).await;
        }
    }

    async fn dispatch(&self, f: impl Fn(&dyn EventHandler)) {
        for handler in self.handlers.read().await.iter() {
            f(handler.as_ref());
        }
    }

    /// Feed `events` into the cache until the token fires or the stream ends.
    pub(crate) async fn drive<S, E>(&self, events: S, resync: Option<Duration>, token: &CancellationToken)
    where
        S: Stream<Item = Result<watcher::Event<DynamicObject>, E>>,
        E: Display,
    {
        pin_mut!(events);
        let mut resync = resync.map(|period| time::interval_at(Instant::now() + period, period));
        let mut retry = RetryDelay::default();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick(&mut resync) => self.resync().await,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        retry.reset();
                        self.process(event).await;
                    }
                    Some(Err(e)) => {
                        let delay = retry.next_delay();
                        warn!("watch failed, retrying in {:?}: {}", delay, e);
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = time::sleep(delay) => {}
                        }
                    }
                    None => {
                        debug!("watch stream ended");
                        break;
                    }
                },
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

/// Doubling delay between failed polls of the watch stream.
#[derive(Debug)]
struct RetryDelay {
    next: Duration,
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self {
            next: INITIAL_RETRY_DELAY,
        }
    }
}

impl RetryDelay {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(MAX_RETRY_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.next = INITIAL_RETRY_DELAY;
    }
}

/// Informer for one resource type. Clones share the cache and handlers.
#[derive(Clone)]
pub struct SharedInformer {
    gvr: Gvr,
    api: Api<DynamicObject>,
    list_params: ListParams,
    resync: Option<Duration>,
    processor: Arc<Processor>,
}

impl SharedInformer {
    pub(crate) fn new(gvr: Gvr, api: Api<DynamicObject>, list_params: ListParams, resync: Option<Duration>) -> Self {
        Self {
            gvr,
            api,
            list_params,
            resync,
            processor: Arc::default(),
        }
    }

    pub fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    pub fn store(&self) -> Store {
        self.processor.store.clone()
    }

    /// True once the initial list has been applied to the cache.
    pub fn has_synced(&self) -> bool {
        self.processor.synced.load(Ordering::SeqCst)
    }

    /// Whether both handles point at the same informer.
    pub fn ptr_eq(&self, other: &SharedInformer) -> bool {
        Arc::ptr_eq(&self.processor, &other.processor)
    }

    /// Register `handler`. Objects already in the cache are replayed to it as adds.
    pub async fn add_event_handler<H>(&self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.processor.add_handler(Arc::new(handler)).await;
    }

    /// List, then watch, until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        info!("starting informer for {}", self.gvr);
        let events = watcher(self.api.clone(), self.list_params.clone());
        self.processor.drive(events, self.resync, &token).await;
        info!("stopped informer for {}", self.gvr);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;
    use kube::{api::ApiResource, core::GroupVersionKind};
    use serde_json::json;

    use super::*;

    /// Records every callback as a short string.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.seen.lock().unwrap())
        }
    }

    impl EventHandler for Recorder {
        fn on_add(&self, obj: &DynamicObject) {
            self.seen.lock().unwrap().push(format!("add {}", key(obj)));
        }

        fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
            self.seen.lock().unwrap().push(format!(
                "update {} {}->{}",
                key(new),
                replicas(old),
                replicas(new)
            ));
        }

        fn on_delete(&self, obj: &DynamicObject) {
            self.seen.lock().unwrap().push(format!("delete {}", key(obj)));
        }
    }

    fn key(obj: &DynamicObject) -> String {
        object_key(&obj.metadata).unwrap()
    }

    fn replicas(obj: &DynamicObject) -> i64 {
        obj.data["spec"]["replicas"].as_i64().unwrap_or_default()
    }

    fn deployment(ns: &str, name: &str, replicas: i64) -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        DynamicObject::new(name, &ar)
            .within(ns)
            .data(json!({ "spec": { "replicas": replicas } }))
    }

    fn ok(event: watcher::Event<DynamicObject>) -> Result<watcher::Event<DynamicObject>, String> {
        Ok(event)
    }

    async fn processor_with(recorder: &Recorder) -> Processor {
        let processor = Processor::default();
        processor.add_handler(Arc::new(recorder.clone())).await;
        processor
    }

    #[test]
    fn keys_follow_namespace_scope() {
        let namespaced = deployment("default", "web", 1);
        assert_eq!(object_key(&namespaced.metadata).as_deref(), Some("default/web"));

        let cluster = ObjectMeta {
            name: Some("node-1".into()),
            ..ObjectMeta::default()
        };
        assert_eq!(object_key(&cluster).as_deref(), Some("node-1"));
        assert_eq!(object_key(&ObjectMeta::default()), None);
    }

    #[tokio::test]
    async fn initial_sync_then_update() {
        let recorder = Recorder::default();
        let processor = processor_with(&recorder).await;

        let events = stream::iter(vec![
            ok(watcher::Event::Restarted(vec![deployment("default", "web", 1)])),
            ok(watcher::Event::Applied(deployment("default", "web", 3))),
        ]);
        processor.drive(events, None, &CancellationToken::new()).await;

        assert_eq!(recorder.take(), vec!["add default/web", "update default/web 1->3"]);
        assert!(processor.synced.load(Ordering::SeqCst));
        assert_eq!(processor.store.len().await, 1);
        let cached = processor.store.get("default/web").await.unwrap();
        assert_eq!(replicas(&cached), 3);
    }

    #[tokio::test]
    async fn store_is_looked_up_by_object_key() {
        let processor = Processor::default();
        let web = deployment("default", "web", 2);
        let key = crate::object_key(&web.metadata).unwrap();

        processor.process(watcher::Event::Restarted(vec![web])).await;

        let cached = processor.store.get(&key).await.unwrap();
        assert_eq!(cached.metadata.name.as_deref(), Some("web"));
        assert_eq!(processor.store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn each_event_reaches_each_handler_once() {
        let first = Recorder::default();
        let second = Recorder::default();
        let processor = processor_with(&first).await;
        processor.add_handler(Arc::new(second.clone())).await;

        let events = stream::iter(vec![
            ok(watcher::Event::Applied(deployment("a", "one", 1))),
            ok(watcher::Event::Applied(deployment("a", "one", 2))),
            ok(watcher::Event::Deleted(deployment("a", "one", 2))),
        ]);
        processor.drive(events, None, &CancellationToken::new()).await;

        let expected = vec!["add a/one", "update a/one 1->2", "delete a/one"];
        assert_eq!(first.take(), expected);
        assert_eq!(second.take(), expected);
        assert!(processor.store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_of_unknown_object_is_ignored() {
        let recorder = Recorder::default();
        let processor = processor_with(&recorder).await;

        processor
            .process(watcher::Event::Deleted(deployment("a", "ghost", 1)))
            .await;

        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn relist_reconciles_cache() {
        let recorder = Recorder::default();
        let processor = processor_with(&recorder).await;

        processor
            .process(watcher::Event::Restarted(vec![
                deployment("a", "kept", 1),
                deployment("a", "dropped", 1),
            ]))
            .await;
        recorder.take();

        processor
            .process(watcher::Event::Restarted(vec![
                deployment("a", "kept", 2),
                deployment("a", "fresh", 1),
            ]))
            .await;

        let mut seen = recorder.take();
        seen.sort();
        assert_eq!(seen, vec!["add a/fresh", "delete a/dropped", "update a/kept 1->2"]);
        assert!(processor.store.get("a/dropped").await.is_none());
        assert_eq!(processor.store.len().await, 2);
    }

    #[tokio::test]
    async fn late_handler_gets_existing_objects() {
        let processor = Processor::default();
        processor
            .process(watcher::Event::Restarted(vec![deployment("a", "one", 1)]))
            .await;

        let late = Recorder::default();
        processor.add_handler(Arc::new(late.clone())).await;
        assert_eq!(late.take(), vec!["add a/one"]);
    }

    #[tokio::test]
    async fn nameless_objects_are_skipped() {
        let recorder = Recorder::default();
        let processor = processor_with(&recorder).await;

        let mut nameless = deployment("a", "x", 1);
        nameless.metadata.name = None;
        processor.process(watcher::Event::Applied(nameless)).await;

        assert!(recorder.take().is_empty());
        assert!(processor.store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_absorbed() {
        let recorder = Recorder::default();
        let processor = processor_with(&recorder).await;

        let events = stream::iter(vec![
            Err("connection reset".to_owned()),
            Err("connection reset".to_owned()),
            ok(watcher::Event::Applied(deployment("a", "one", 1))),
        ]);
        let started = Instant::now();
        processor.drive(events, None, &CancellationToken::new()).await;

        assert_eq!(recorder.take(), vec!["add a/one"]);
        assert!(started.elapsed() >= INITIAL_RETRY_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_redelivers_cache() {
        let recorder = Recorder::default();
        let processor = Arc::new(processor_with(&recorder).await);
        let token = CancellationToken::new();

        let events = stream::iter(vec![ok(watcher::Event::Restarted(vec![deployment("a", "one", 4)]))])
            .chain(stream::pending());
        let task = {
            let processor = processor.clone();
            let token = token.clone();
            tokio::spawn(async move {
                processor
                    .drive(events, Some(Duration::from_secs(10)), &token)
                    .await
            })
        };

        time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(
            recorder.take(),
            vec!["add a/one", "update a/one 4->4", "update a/one 4->4"]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_stream() {
        let processor = Processor::default();
        let token = CancellationToken::new();
        token.cancel();

        let events = stream::pending::<Result<watcher::Event<DynamicObject>, String>>();
        processor.drive(events, None, &token).await;
    }

    #[test]
    fn retry_delay_is_capped_and_resets() {
        let mut retry = RetryDelay::default();
        let delays: Vec<u64> = (0..7).map(|_| retry.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        retry.reset();
        assert_eq!(retry.next_delay(), INITIAL_RETRY_DELAY);
    }
}
