//! # Emitter Module
//!
//! The user-facing façade. An [`Emitter`] binds an event stack, a
//! transport, registered callbacks, and configuration. Emitting rolls the
//! stack up with the incoming event, validates, serializes, and hands the
//! JSON to the transport; nested context is entered through
//! [`EmitterScope`]s that emit paired entry/exit events.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::BoxedAdapter;
use crate::config::Config;
use crate::error::Result;
use crate::event::{Event, EventArg};
use crate::stack::EventStack;
use crate::transport::Transport;

/// System tag stamped on ping events
const PING_SYSTEM: &str = "test.emit";

/// Callback invoked with each validated event before it is handed off
pub type EmitCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Binds an event stack and a transport into the emit surface
pub struct Emitter {
    config: Config,
    stack: EventStack,
    transport: Arc<Transport>,
    callbacks: Vec<EmitCallback>,
}

impl Emitter {
    /// Create an emitter from configuration; `adapter_url` selects the
    /// sink, empty means noop
    pub fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(Transport::from_config(&config)?);
        Ok(Self::with_transport(transport, config))
    }

    /// Create an emitter from `EMIT_`-prefixed environment configuration
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// Create an emitter delivering to the given adapter
    pub fn with_adapter(adapter: BoxedAdapter, config: Config) -> Self {
        let transport = Arc::new(Transport::new(adapter, &config));
        Self::with_transport(transport, config)
    }

    /// Create an emitter over an externally-owned transport. The supplier
    /// keeps lifecycle responsibility for the transport.
    pub fn with_transport(transport: Arc<Transport>, config: Config) -> Self {
        let mut stack = EventStack::new();
        stack.push(Event::new());
        Self {
            config,
            stack,
            transport,
            callbacks: Vec::new(),
        }
    }

    /// The transport this emitter delivers through
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The context stack, bottom frame first
    pub fn stack(&self) -> &EventStack {
        &self.stack
    }

    /// Mutable access to the context stack
    pub fn stack_mut(&mut self) -> &mut EventStack {
        &mut self.stack
    }

    /// Register a callback invoked with each validated event
    pub fn add_callback(&mut self, callback: impl Fn(&Event) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Assign defaults to any empty keys on the current (top) frame
    pub fn defaults(&mut self, defaults: &Event) {
        if let Some(top) = self.stack.top_mut() {
            top.defaults(defaults);
        }
    }

    /// The rolled-up view of the current context
    pub fn to_event(&self) -> Event {
        self.stack.to_event()
    }

    /// Emit one event built from `args`, merged over the current context.
    ///
    /// Returns the validated event that was handed to the transport.
    /// Validation, serialization, and delivery hand-off failures are
    /// logged and swallowed (returning `Ok(None)`) unless `debug` is set,
    /// in which case they propagate.
    pub async fn emit<I>(&self, args: I) -> Result<Option<Event>>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let args: Vec<EventArg> = args.into_iter().map(Into::into).collect();
        match self.try_emit(args).await {
            Ok(event) => Ok(Some(event)),
            Err(error) if self.config.debug => Err(error),
            Err(error) => {
                warn!(%error, "emit failed (enable debug to propagate)");
                Ok(None)
            }
        }
    }

    /// Emit without the swallow policy: every failure propagates
    pub async fn try_emit(&self, args: Vec<EventArg>) -> Result<Event> {
        let incoming = Event::with_args(args)?;
        let mut event = self.stack.to_event();
        event.merge_canonical(&incoming);
        event.validate()?;

        for callback in &self.callbacks {
            callback(&event);
        }

        let json = event.to_json(self.config.pretty_json())?;
        self.transport.emit(json, None).await?;
        Ok(event)
    }

    /// Enter a nested context, emitting an `enter` event now and an `exit`
    /// event when the scope is exited
    pub async fn enter<I>(&mut self, args: I) -> Result<EmitterScope<'_>>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.scope_with(args, "enter", "exit").await
    }

    /// Enter a nested context, emitting an `open` event now and a `close`
    /// event when the scope is exited
    pub async fn open<I>(&mut self, args: I) -> Result<EmitterScope<'_>>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.scope_with(args, "open", "close").await
    }

    /// Emit one event and enter a scope based on the same arguments, so
    /// nested emissions are prefixed by it
    pub async fn emit_scope<I>(&mut self, args: I) -> Result<EmitterScope<'_>>
    where
        I: IntoIterator,
        I::Item: Into<EventArg>,
    {
        let args: Vec<EventArg> = args.into_iter().map(Into::into).collect();
        self.emit(args.clone()).await?;
        self.scope_with(args, "enter", "exit").await
    }

    async fn scope_with(
        &mut self,
        args: Vec<EventArg>,
        entry_name: &str,
        exit_name: &str,
    ) -> Result<EmitterScope<'_>> {
        let base = Event::with_args(args)?;

        // The base frame carries the scope's context; the transient
        // overlay on top takes attribute writes without them being
        // inherited after exit.
        self.stack.push(base);
        self.stack.push(Event::new());
        if let Err(error) = self.emit([entry_name]).await {
            self.stack.pop();
            self.stack.pop();
            return Err(error);
        }

        Ok(EmitterScope {
            emitter: self,
            exit_name: exit_name.to_string(),
            armed: true,
        })
    }

    /// Emit `open`, `ping`, and `close` events with a fresh trace id and
    /// fixed identity tags. Returns the trace id for downstream lookup.
    pub async fn ping(&self) -> Result<String> {
        let tid = Uuid::new_v4().to_string();

        let mut base = Event::new();
        base.tid = tid.clone();
        base.system = PING_SYSTEM.to_string();
        base.component = "emitter".to_string();
        base.operation = "ping".to_string();

        for name in ["open", "ping", "close"] {
            let mut event = base.clone();
            event.name = name.to_string();
            let json = event.to_json(self.config.pretty_json())?;
            self.transport.emit(json, None).await?;
        }
        Ok(tid)
    }

    fn top_frame(&mut self) -> &mut Event {
        if self.stack.is_empty() {
            self.stack.push(Event::new());
        }
        self.stack.top_mut().expect("stack has a frame")
    }

    /// `system` on the current frame
    pub fn system(&self) -> &str {
        self.stack.top().map_or("", |event| event.system.as_str())
    }

    /// Write `system` on the current frame
    pub fn set_system(&mut self, system: impl Into<String>) {
        self.top_frame().system = system.into();
    }

    /// `component` on the current frame
    pub fn component(&self) -> &str {
        self.stack
            .top()
            .map_or("", |event| event.component.as_str())
    }

    /// Write `component` on the current frame
    pub fn set_component(&mut self, component: impl Into<String>) {
        self.top_frame().component = component.into();
    }

    /// `operation` on the current frame
    pub fn operation(&self) -> &str {
        self.stack
            .top()
            .map_or("", |event| event.operation.as_str())
    }

    /// Write `operation` on the current frame
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.top_frame().operation = operation.into();
    }

    /// `name` on the current frame
    pub fn name(&self) -> &str {
        self.stack.top().map_or("", |event| event.name.as_str())
    }

    /// Write `name` on the current frame
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.top_frame().name = name.into();
    }

    /// `tid` on the current frame
    pub fn tid(&self) -> &str {
        self.stack.top().map_or("", |event| event.tid.as_str())
    }

    /// Write `tid` on the current frame
    pub fn set_tid(&mut self, tid: impl Into<String>) {
        self.top_frame().tid = tid.into();
    }

    /// Write `time` on the current frame
    pub fn set_time(&mut self, time: chrono::DateTime<chrono::Utc>) {
        self.top_frame().time = time;
    }

    /// Write `tags` on the current frame, de-duplicating
    pub fn set_tags<I>(&mut self, tags: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.top_frame().tags = Some(tags.into_iter().map(Into::into).collect());
    }

    /// Write `fields` on the current frame
    pub fn set_fields(
        &mut self,
        fields: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) {
        self.top_frame().fields = Some(fields.into_iter().collect());
    }

    /// Write `data` on the current frame
    pub fn set_data(&mut self, data: serde_json::Map<String, serde_json::Value>) {
        self.top_frame().data = Some(data);
    }

    /// Write `replay` on the current frame
    pub fn set_replay(&mut self, replay: impl Into<String>) {
        self.top_frame().replay = Some(replay.into());
    }

    /// The topmost context frame
    pub fn top(&self) -> Option<&Event> {
        self.stack.top()
    }

    /// The bottom (defaults) context frame
    pub fn bottom(&self) -> Option<&Event> {
        self.stack.bottom()
    }

    /// Mutable access to the bottom (defaults) frame
    pub fn bottom_mut(&mut self) -> Option<&mut Event> {
        self.stack.bottom_mut()
    }
}

/// A nested emission context. Exiting emits the paired exit event and pops
/// the scope's frames; a scope dropped without [`EmitterScope::exit`] pops
/// silently.
pub struct EmitterScope<'a> {
    emitter: &'a mut Emitter,
    exit_name: String,
    armed: bool,
}

impl EmitterScope<'_> {
    /// Emit the paired exit event and leave the scope
    pub async fn exit(mut self) -> Result<()> {
        self.armed = false;
        let exit_name = std::mem::take(&mut self.exit_name);

        // Pop the transient overlay, emit the exit event with the base
        // frame still in context, then pop the base.
        self.emitter.stack.pop();
        let result = self.emitter.emit([exit_name]).await;
        self.emitter.stack.pop();
        result.map(|_| ())
    }

    /// Alias for [`EmitterScope::exit`], pairing with [`Emitter::open`]
    pub async fn close(self) -> Result<()> {
        self.exit().await
    }
}

impl Deref for EmitterScope<'_> {
    type Target = Emitter;

    fn deref(&self) -> &Emitter {
        self.emitter
    }
}

impl DerefMut for EmitterScope<'_> {
    fn deref_mut(&mut self) -> &mut Emitter {
        self.emitter
    }
}

impl Drop for EmitterScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.emitter.stack.pop();
            self.emitter.stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Adapter, ListAdapter};
    use crate::config::WorkerMode;
    use pretty_assertions::assert_eq;

    fn inline_config() -> Config {
        Config {
            worker_mode: WorkerMode::Inline,
            max_work_time: 1.0,
            ..Config::default()
        }
    }

    fn list_emitter() -> (ListAdapter, Emitter) {
        let list = ListAdapter::new();
        let mut emitter = Emitter::with_adapter(list.clone_adapter(), inline_config());
        emitter.set_system("svc");
        emitter.set_component("c");
        emitter.set_tid("tid-1");
        (list, emitter)
    }

    fn decode(body: &str) -> Event {
        Event::from_json(body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_emit() {
        let (list, emitter) = list_emitter();

        let event = emitter.emit(["hello"]).await.unwrap().unwrap();
        assert_eq!(event.name, "hello");

        let bodies = list.bodies();
        assert_eq!(bodies.len(), 1);

        let delivered = decode(&bodies[0]);
        assert_eq!(delivered.name, "hello");
        assert_eq!(delivered.system, "svc");
        assert_eq!(delivered.component, "c");
        // Finalization defaulted operation to component.
        assert_eq!(delivered.operation, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_emit_is_swallowed_without_debug() {
        let (list, emitter) = list_emitter();

        // Empty name fails validation; swallowed, nothing delivered.
        let result = emitter.emit([""]).await.unwrap();
        assert!(result.is_none());
        assert!(list.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_emit_propagates_with_debug() {
        let list = ListAdapter::new();
        let config = Config {
            debug: true,
            ..inline_config()
        };
        let mut emitter = Emitter::with_adapter(list.clone_adapter(), config);
        emitter.set_system("svc");

        assert!(emitter.emit([""]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_see_final_event() {
        let (_list, mut emitter) = list_emitter();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        emitter.add_callback(move |event| sink.lock().push(event.name.clone()));

        emitter.emit(["one"]).await.unwrap();
        emitter.emit(["two"]).await.unwrap();

        assert_eq!(*seen.lock(), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_scope_canonicalization() {
        let (list, mut emitter) = list_emitter();
        emitter.set_name("base");
        for name in ["one", "two", "three"] {
            let mut frame = Event::new();
            frame.name = name.to_string();
            emitter.stack_mut().push(frame);
        }

        emitter.emit(["a"]).await.unwrap();
        assert_eq!(decode(&list.bodies()[0]).name, "base.one.two.three.a");

        let scope = emitter.emit_scope(["called"]).await.unwrap();
        scope.emit(["hello"]).await.unwrap();
        scope.exit().await.unwrap();

        let names: Vec<String> = list.bodies()[1..]
            .iter()
            .map(|body| decode(body).name)
            .collect();
        assert_eq!(
            names,
            vec![
                "base.one.two.three.called",
                "base.one.two.three.called.enter",
                "base.one.two.three.called.hello",
                "base.one.two.three.called.exit",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_scope_emits_paired_events() {
        let (list, mut emitter) = list_emitter();

        let scope = emitter.open(["task"]).await.unwrap();
        scope.close().await.unwrap();

        let names: Vec<String> = list.bodies().iter().map(|b| decode(b).name).collect();
        assert_eq!(names, vec!["task.open", "task.close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_frames_pop_on_exit() {
        let (_list, mut emitter) = list_emitter();
        let depth = emitter.stack().len();

        let scope = emitter.enter(["scope"]).await.unwrap();
        assert_eq!(scope.stack().len(), depth + 2);
        scope.exit().await.unwrap();

        assert_eq!(emitter.stack().len(), depth);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_scope_pops_silently() {
        let (list, mut emitter) = list_emitter();
        let depth = emitter.stack().len();

        {
            let _scope = emitter.enter(["scope"]).await.unwrap();
        }

        assert_eq!(emitter.stack().len(), depth);
        // Only the enter event was emitted, no exit.
        let names: Vec<String> = list.bodies().iter().map(|b| decode(b).name).collect();
        assert_eq!(names, vec!["scope.enter"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_writes_are_transient() {
        let (_list, mut emitter) = list_emitter();

        let mut scope = emitter.enter(["scope"]).await.unwrap();
        scope.set_operation("transient-op");
        assert_eq!(scope.operation(), "transient-op");
        scope.exit().await.unwrap();

        assert_eq!(emitter.operation(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_emits_three_events() {
        let (list, emitter) = list_emitter();

        let tid = emitter.ping().await.unwrap();
        assert!(!tid.is_empty());

        let events: Vec<Event> = list.bodies().iter().map(|b| decode(b)).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["open", "ping", "close"]
        );
        for event in &events {
            assert_eq!(event.tid, tid);
            assert_eq!(event.system, "test.emit");
            assert_eq!(event.component, "emitter");
            assert_eq!(event.operation, "ping");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_fill_only_empty_keys() {
        let (_list, mut emitter) = list_emitter();

        let mut defaults = Event::new();
        defaults.system = "default-sys".to_string();
        defaults.operation = "default-op".to_string();
        emitter.defaults(&defaults);

        // system was already set, operation was empty.
        assert_eq!(emitter.system(), "svc");
        assert_eq!(emitter.operation(), "default-op");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_transport() {
        let list = ListAdapter::new();
        let transport = Arc::new(Transport::new(list.clone_adapter(), &inline_config()));

        let mut a = Emitter::with_transport(Arc::clone(&transport), inline_config());
        a.set_system("svc");
        a.set_component("a");
        a.set_tid("t");

        let mut b = Emitter::with_transport(Arc::clone(&transport), inline_config());
        b.set_system("svc");
        b.set_component("b");
        b.set_tid("t");

        a.emit(["from-a"]).await.unwrap();
        b.emit(["from-b"]).await.unwrap();

        assert_eq!(list.len(), 2);
    }
}
