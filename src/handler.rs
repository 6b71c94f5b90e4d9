use kube::{api::DynamicObject, ResourceExt};
use log::info;

/// Callbacks an informer invokes as the watched resource changes.
///
/// Every hook defaults to doing nothing, so implementors only write the ones
/// they care about. Hooks run on the informer task and cannot fail.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, _obj: &DynamicObject) {}

    fn on_update(&self, _old: &DynamicObject, _new: &DynamicObject) {}

    fn on_delete(&self, _obj: &DynamicObject) {}
}

/// Logs one line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_add(&self, obj: &DynamicObject) {
        info!("received add event! {}", describe(obj));
    }

    fn on_update(&self, _old: &DynamicObject, new: &DynamicObject) {
        info!("received update event! {}", describe(new));
    }

    fn on_delete(&self, obj: &DynamicObject) {
        info!("received delete event! {}", describe(obj));
    }
}

fn describe(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object");
    match obj.namespace() {
        Some(ns) => format!("{} {}/{}", kind, ns, obj.name_any()),
        None => format!("{} {}", kind, obj.name_any()),
    }
}
