//! Dispatchers scoped to an ownership tree.
//!
//! Nodes form a parent/child tree, the way scene objects do. A dispatcher is
//! attached to a node and serves that node's subtree; a listener finds its
//! dispatcher by walking up from its own node to the nearest ancestor (itself
//! included) carrying one for the category.
//!
//! Despawning a node despawns its subtree, drops the dispatchers attached
//! there and kills every listener registered on those nodes.

use super::{erase, restore, ErasedDispatcher};
use crate::config::DispatchConfig;
use crate::diagnostics::DiagnosticSink;
use crate::dispatcher::EventDispatcher;
use crate::error::{EventError, Result};
use crate::event::{EventCategory, EventRecord};
use crate::pool::EventRef;
use crate::registry::{EventListener, LifeToken};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique identifier for hierarchy nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    dispatchers: HashMap<TypeId, ErasedDispatcher>,
    alive: LifeToken,
}

impl Node {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            dispatchers: HashMap::new(),
            alive: LifeToken::new(),
        }
    }
}

/// Ownership tree whose nodes can carry dispatchers.
#[derive(Default)]
pub struct Hierarchy {
    nodes: RefCell<HashMap<NodeId, Node>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------

    pub fn spawn_root(&self, name: &str) -> NodeId {
        let id = NodeId::new();
        self.nodes.borrow_mut().insert(id, Node::new(name, None));
        id
    }

    pub fn spawn_child(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId::new();
        nodes
            .get_mut(&parent)
            .ok_or(EventError::NodeNotFound(parent))?
            .children
            .push(id);
        nodes.insert(id, Node::new(name, Some(parent)));
        Ok(id)
    }

    /// Removes `node` and its whole subtree. Returns how many nodes went.
    pub fn despawn(&self, node: NodeId) -> Result<usize> {
        let mut nodes = self.nodes.borrow_mut();
        let parent = nodes.get(&node).ok_or(EventError::NodeNotFound(node))?.parent;
        if let Some(parent) = parent.and_then(|p| nodes.get_mut(&p)) {
            parent.children.retain(|child| *child != node);
        }

        let mut stack = vec![node];
        let mut removed = 0;
        while let Some(id) = stack.pop() {
            if let Some(gone) = nodes.remove(&id) {
                gone.alive.kill();
                stack.extend(gone.children);
                removed += 1;
            }
        }
        debug!("Despawned {} hierarchy nodes under {}", removed, node);
        Ok(removed)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.borrow().contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub fn name(&self, node: NodeId) -> Result<String> {
        self.with_node(node, |n| n.name.clone())
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.with_node(node, |n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.with_node(node, |n| n.children.clone())
    }

    /// Liveness token of `node`, killed when the node is despawned.
    pub fn liveness(&self, node: NodeId) -> Result<LifeToken> {
        self.with_node(node, |n| n.alive.clone())
    }

    fn with_node<R>(&self, node: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        self.nodes
            .borrow()
            .get(&node)
            .map(f)
            .ok_or(EventError::NodeNotFound(node))
    }

    // ------------------------------------------------------------------
    // Dispatchers
    // ------------------------------------------------------------------

    /// Attaches a dispatcher for `C` to `node`. Idempotent: a node keeps the
    /// first dispatcher attached for a category.
    pub fn attach_dispatcher<C: EventCategory>(
        &self,
        node: NodeId,
        config: DispatchConfig,
    ) -> Result<Rc<EventDispatcher<C>>> {
        self.attach_with(node, || EventDispatcher::new(config))
    }

    /// Like [`attach_dispatcher`](Self::attach_dispatcher), reporting through
    /// a custom sink.
    pub fn attach_dispatcher_with_sink<C: EventCategory>(
        &self,
        node: NodeId,
        config: DispatchConfig,
        sink: Rc<dyn DiagnosticSink>,
    ) -> Result<Rc<EventDispatcher<C>>> {
        self.attach_with(node, || EventDispatcher::with_sink(config, sink))
    }

    fn attach_with<C: EventCategory>(
        &self,
        node: NodeId,
        create: impl FnOnce() -> EventDispatcher<C>,
    ) -> Result<Rc<EventDispatcher<C>>> {
        let mut nodes = self.nodes.borrow_mut();
        let entry = nodes.get_mut(&node).ok_or(EventError::NodeNotFound(node))?;
        if let Some(existing) = entry.dispatchers.get(&TypeId::of::<C>()).and_then(restore::<C>) {
            return Ok(existing);
        }

        let dispatcher = Rc::new(create());
        entry
            .dispatchers
            .insert(TypeId::of::<C>(), erase(dispatcher.clone()));
        info!("📡 Attached {} dispatcher to node {} ({})", C::NAME, entry.name, node);
        Ok(dispatcher)
    }

    /// Walks up from `node`, itself included, to the nearest dispatcher for `C`.
    pub fn resolve<C: EventCategory>(&self, node: NodeId) -> Result<Rc<EventDispatcher<C>>> {
        let nodes = self.nodes.borrow();
        let mut current = Some(node);
        while let Some(id) = current {
            let entry = nodes.get(&id).ok_or(EventError::NodeNotFound(id))?;
            if let Some(dispatcher) = entry.dispatchers.get(&TypeId::of::<C>()).and_then(restore::<C>) {
                return Ok(dispatcher);
            }
            current = entry.parent;
        }
        Err(EventError::NoDispatcherInScope {
            category: C::NAME,
            node,
        })
    }

    /// Registers `listener` as living on `node` with the dispatcher that
    /// serves it. The bindings die with the listener or with the node.
    pub fn register_listener<C, L>(&self, node: NodeId, listener: &Rc<L>) -> Result<ScopedListener<C>>
    where
        C: EventCategory,
        L: EventListener<C>,
    {
        let dispatcher = self.resolve::<C>(node)?;
        let liveness = self.liveness(node)?;
        let handlers = dispatcher.register_with_liveness(listener, liveness);
        Ok(ScopedListener {
            node,
            handlers,
            dispatcher,
        })
    }
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy").field("nodes", &self.len()).finish()
    }
}

/// A listener's registration in a hierarchy, holding the dispatcher it
/// resolved so the listener can send through it later.
pub struct ScopedListener<C: EventCategory> {
    node: NodeId,
    handlers: usize,
    dispatcher: Rc<EventDispatcher<C>>,
}

impl<C: EventCategory> ScopedListener<C> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Handlers bound at registration.
    pub fn handler_count(&self) -> usize {
        self.handlers
    }

    pub fn dispatcher(&self) -> &Rc<EventDispatcher<C>> {
        &self.dispatcher
    }

    pub fn send<T: EventRecord<Category = C>>(&self, record: &EventRef<T>) -> Result<()> {
        self.dispatcher.submit(record)
    }

    pub fn send_immediate<T: EventRecord<Category = C>>(&self, record: &EventRef<T>) -> Result<()> {
        self.dispatcher.submit_immediate(record)
    }

    #[track_caller]
    pub fn acquire<T: EventRecord<Category = C>>(&self) -> EventRef<T> {
        self.dispatcher.acquire::<T>()
    }

    pub fn release<T: EventRecord<Category = C>>(&self, record: EventRef<T>) {
        self.dispatcher.release(record);
    }
}

impl<C: EventCategory> Clone for ScopedListener<C> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            handlers: self.handlers,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<C: EventCategory> fmt::Debug for ScopedListener<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedListener")
            .field("category", &C::NAME)
            .field("node", &self.node)
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerTable;
    use crate::{define_category, define_event};

    define_category!(Room);

    define_event! {
        struct Chat in Room {
            text: String,
        }
    }

    #[derive(Default)]
    struct Occupant {
        heard: RefCell<Vec<String>>,
    }

    impl Occupant {
        fn on_chat(&self, event: &Chat) -> Result<()> {
            self.heard.borrow_mut().push(event.text.clone());
            Ok(())
        }
    }

    impl EventListener<Room> for Occupant {
        fn handlers(table: &mut HandlerTable<Room, Self>) {
            table.on(Self::on_chat);
        }
    }

    fn say(listener: &ScopedListener<Room>, text: &str) {
        let record = listener.acquire::<Chat>();
        record.borrow_mut().reset(text.to_string());
        listener.send(&record).unwrap();
        listener.release(record);
    }

    #[test]
    fn test_tree_navigation() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let child = tree.spawn_child(root, "house").unwrap();

        assert_eq!(tree.parent(child).unwrap(), Some(root));
        assert_eq!(tree.parent(root).unwrap(), None);
        assert_eq!(tree.children(root).unwrap(), vec![child]);
        assert_eq!(tree.name(child).unwrap(), "house");
    }

    #[test]
    fn test_resolve_walks_up_to_nearest_dispatcher() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let house = tree.spawn_child(root, "house").unwrap();
        let kitchen = tree.spawn_child(house, "kitchen").unwrap();

        let world = tree.attach_dispatcher::<Room>(root, DispatchConfig::default()).unwrap();
        assert!(Rc::ptr_eq(&tree.resolve::<Room>(kitchen).unwrap(), &world));

        let local = tree.attach_dispatcher::<Room>(house, DispatchConfig::default()).unwrap();
        assert!(Rc::ptr_eq(&tree.resolve::<Room>(kitchen).unwrap(), &local));
        assert!(Rc::ptr_eq(&tree.resolve::<Room>(house).unwrap(), &local));
        assert!(Rc::ptr_eq(&tree.resolve::<Room>(root).unwrap(), &world));
    }

    #[test]
    fn test_attach_is_idempotent() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let first = tree.attach_dispatcher::<Room>(root, DispatchConfig::default()).unwrap();
        let again = tree.attach_dispatcher::<Room>(root, DispatchConfig::default()).unwrap();
        assert!(Rc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_missing_dispatcher_is_configuration_error() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let child = tree.spawn_child(root, "house").unwrap();

        let err = tree.resolve::<Room>(child).unwrap_err();
        assert!(matches!(err, EventError::NoDispatcherInScope { category: "Room", node } if node == child));
        assert!(err.is_configuration());

        let stranger = NodeId::new();
        assert!(matches!(tree.resolve::<Room>(stranger), Err(EventError::NodeNotFound(id)) if id == stranger));
    }

    #[test]
    fn test_sibling_subtrees_are_isolated() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let left = tree.spawn_child(root, "left").unwrap();
        let right = tree.spawn_child(root, "right").unwrap();
        tree.attach_dispatcher::<Room>(left, DispatchConfig::default()).unwrap();
        tree.attach_dispatcher::<Room>(right, DispatchConfig::default()).unwrap();

        let alice = Rc::new(Occupant::default());
        let bob = Rc::new(Occupant::default());
        let alice_scope = tree.register_listener::<Room, _>(left, &alice).unwrap();
        let _bob_scope = tree.register_listener::<Room, _>(right, &bob).unwrap();

        say(&alice_scope, "hello left");

        assert_eq!(*alice.heard.borrow(), vec!["hello left"]);
        assert!(bob.heard.borrow().is_empty());
        assert_eq!(alice_scope.handler_count(), 1);
    }

    #[test]
    fn test_despawn_kills_listeners_in_subtree() {
        let tree = Hierarchy::new();
        let root = tree.spawn_root("world");
        let house = tree.spawn_child(root, "house").unwrap();
        let room = tree.spawn_child(house, "room").unwrap();
        tree.attach_dispatcher::<Room>(root, DispatchConfig::default()).unwrap();

        let host = Rc::new(Occupant::default());
        let guest = Rc::new(Occupant::default());
        let host_scope = tree.register_listener::<Room, _>(root, &host).unwrap();
        tree.register_listener::<Room, _>(room, &guest).unwrap();

        assert_eq!(tree.despawn(house).unwrap(), 2);
        assert!(!tree.contains(room));
        assert_eq!(tree.children(root).unwrap(), Vec::<NodeId>::new());

        say(&host_scope, "anyone there?");

        assert_eq!(host.heard.borrow().len(), 1);
        assert!(guest.heard.borrow().is_empty());
        assert_eq!(host_scope.dispatcher().listener_count_for::<Chat>(), 1);
    }
}
