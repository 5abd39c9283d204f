//! # Event Stack Module
//!
//! An ordered sequence of partially-populated events tracking nested
//! context. The bottom frame carries stable defaults (system/component);
//! higher frames overlay transient context. The stack rolls up into one
//! canonical event via left-to-right name-canonicalizing merge.

use serde_json::Value;

use crate::event::Event;

/// LIFO stack of partial events for tracking context
#[derive(Debug, Clone, Default)]
pub struct EventStack {
    frames: Vec<Event>,
}

impl EventStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames on the stack
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true when no frames are present
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Push a frame on scope entry
    pub fn push(&mut self, event: Event) {
        self.frames.push(event);
    }

    /// Push an empty frame and return a reference to it
    pub fn enter(&mut self) -> &mut Event {
        self.frames.push(Event::new());
        self.frames.last_mut().expect("frame was just pushed")
    }

    /// Pop the topmost frame on scope exit
    pub fn pop(&mut self) -> Option<Event> {
        self.frames.pop()
    }

    /// The topmost frame, or `None` if empty
    pub fn top(&self) -> Option<&Event> {
        self.frames.last()
    }

    /// Mutable access to the topmost frame
    pub fn top_mut(&mut self) -> Option<&mut Event> {
        self.frames.last_mut()
    }

    /// The bottom frame, or `None` if empty
    pub fn bottom(&self) -> Option<&Event> {
        self.frames.first()
    }

    /// Mutable access to the bottom frame
    pub fn bottom_mut(&mut self) -> Option<&mut Event> {
        self.frames.first_mut()
    }

    /// Raw frame access by index, bottom first
    pub fn frame(&self, index: usize) -> Option<&Event> {
        self.frames.get(index)
    }

    /// Roll the stack up into one canonical event: the bottom frame merged
    /// with each higher frame in order, composing names without stutter
    pub fn to_event(&self) -> Event {
        let mut frames = self.frames.iter();
        let mut out = match frames.next() {
            Some(bottom) => bottom.clone(),
            None => return Event::new(),
        };
        for frame in frames {
            out.merge_canonical(frame);
        }
        out
    }

    /// Key lookup against the rolled-up event. Optional keys resolve only
    /// when set on some frame; integer frame access goes through
    /// [`EventStack::frame`] instead.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let value = serde_json::to_value(self.to_event()).ok()?;
        value.get(key).cloned()
    }

    /// Check whether a key resolves on the rolled-up event
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
}

impl std::fmt::Display for EventStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventStack(tid={})", self.to_event().tid)?;
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            write!(
                f,
                "\n{}-> name={} system={} component={} operation={}",
                "  ".repeat(depth + 1),
                frame.name,
                frame.system,
                frame.component,
                frame.operation
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn named(name: &str) -> Event {
        let mut event = Event::new();
        event.name = name.to_string();
        event
    }

    #[test]
    fn test_roll_up_canonicalizes_names() {
        let mut stack = EventStack::new();
        stack.push(named("base"));
        stack.push(named("one"));
        stack.push(named("two"));
        stack.push(named("three"));

        assert_eq!(stack.to_event().name, "base.one.two.three");
    }

    #[test]
    fn test_roll_up_suppresses_tail_stutter() {
        let mut stack = EventStack::new();
        stack.push(named("base.one"));
        stack.push(named("one"));

        assert_eq!(stack.to_event().name, "base.one");
    }

    #[test]
    fn test_bottom_defaults_overlaid_by_higher_frames() {
        let mut bottom = Event::new();
        bottom.system = "svc".to_string();
        bottom.component = "c".to_string();

        let mut top = Event::new();
        top.component = "override".to_string();

        let mut stack = EventStack::new();
        stack.push(bottom);
        stack.push(top);

        let rolled = stack.to_event();
        assert_eq!(rolled.system, "svc");
        assert_eq!(rolled.component, "override");
    }

    #[test]
    fn test_empty_stack_rolls_up_to_empty_event() {
        let stack = EventStack::new();
        let event = stack.to_event();

        assert_eq!(event.name, "");
        assert_eq!(event.tid, "");
    }

    #[test]
    fn test_to_event_is_stable() {
        let mut stack = EventStack::new();
        stack.push(named("base"));
        stack.push(named("leaf"));

        let first = stack.to_event();
        let second = stack.to_event();
        assert_eq!(first.name, second.name);
        assert_eq!(first.system, second.system);
    }

    #[test]
    fn test_push_pop_reentrant() {
        let mut stack = EventStack::new();
        stack.push(named("base"));

        for _ in 0..3 {
            stack.push(named("scope"));
            assert_eq!(stack.to_event().name, "base.scope");
            stack.pop();
            assert_eq!(stack.to_event().name, "base");
        }
    }

    #[test]
    fn test_lookup_reads_rolled_up_event() {
        let mut stack = EventStack::new();
        stack.push(named("base"));
        stack.push(named("leaf"));

        assert_eq!(
            stack.lookup("name"),
            Some(serde_json::Value::String("base.leaf".to_string()))
        );
        assert!(!stack.contains("tags"));
    }

    #[test]
    fn test_frame_indexing_returns_raw_frames() {
        let mut stack = EventStack::new();
        stack.push(named("base"));
        stack.push(named("leaf"));

        assert_eq!(stack.frame(0).unwrap().name, "base");
        assert_eq!(stack.frame(1).unwrap().name, "leaf");
        assert!(stack.frame(2).is_none());

        assert_eq!(stack.bottom().unwrap().name, "base");
        assert_eq!(stack.top().unwrap().name, "leaf");
    }
}
