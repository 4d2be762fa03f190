use std::cell::RefCell;
use std::hash::BuildHasherDefault;
use std::panic;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<ahash::AHasher>>;
pub type IndexSet<V> = indexmap::IndexSet<V, BuildHasherDefault<ahash::AHasher>>;

pub trait Config: Sized {
    fn config(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

impl<T> Config for T {}

/// A process-local monotonic counter, for ids that must be unique per
/// engine instance but need not persist (layer ids, connection ids).
#[derive(Default)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A stack of `T` shared via `Rc<RefCell<..>>` with guaranteed-release
/// push/pop: `push` returns a guard that pops on drop, even if the guard
/// is dropped by a cancelled iterator rather than by falling off the end
/// of a block. Mirrors `enter_panic`'s push-on-construct/pop-on-drop shape,
/// generalized to an arbitrary stack rather than the fixed thread-local
/// panic-context stack below.
#[derive(Clone)]
pub struct ScopeStack<T>(Rc<RefCell<Vec<T>>>);

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }
}

impl<T> ScopeStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: T) -> ScopeGuard<T> {
        self.0.borrow_mut().push(value);
        ScopeGuard { stack: self.0.clone() }
    }

    pub fn top(&self) -> Option<std::cell::Ref<'_, T>> {
        let inner = self.0.borrow();
        if inner.is_empty() {
            None
        } else {
            Some(std::cell::Ref::map(inner, |v| v.last().unwrap()))
        }
    }

    /// The frame at absolute index `depth` (0 = the first one pushed),
    /// for callers that need to walk the stack rather than only peek its
    /// top — e.g. resolving a name against whichever enclosing row frame
    /// declares it.
    pub fn get(&self, depth: usize) -> Option<std::cell::Ref<'_, T>> {
        let inner = self.0.borrow();
        if depth >= inner.len() {
            None
        } else {
            Some(std::cell::Ref::map(inner, |v| &v[depth]))
        }
    }

    pub fn depth(&self) -> usize {
        self.0.borrow().len()
    }
}

#[must_use]
pub struct ScopeGuard<T> {
    stack: Rc<RefCell<Vec<T>>>,
}

impl<T> Drop for ScopeGuard<T> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

pub fn enter_panic(context: String) -> PanicContext {
    static ONCE: Once = Once::new();
    ONCE.call_once(PanicContext::init);

    with_ctx(|ctx| ctx.push(context));
    PanicContext { _priv: () }
}

#[must_use]
pub struct PanicContext {
    _priv: (),
}

impl PanicContext {
    #[allow(clippy::print_stderr)]
    fn init() {
        let default_hook = panic::take_hook();
        let hook = move |panic_info: &panic::PanicHookInfo<'_>| {
            with_ctx(|ctx| {
                if !ctx.is_empty() {
                    eprintln!("Panic context:");
                    for frame in ctx.iter() {
                        eprintln!("> {frame}\n");
                    }
                }
                default_hook(panic_info);
            });
        };
        panic::set_hook(Box::new(hook));
    }
}

impl Drop for PanicContext {
    fn drop(&mut self) {
        with_ctx(|ctx| assert!(ctx.pop().is_some()));
    }
}

fn with_ctx(f: impl FnOnce(&mut Vec<String>)) {
    thread_local! {
        static CTX: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }
    CTX.with(|ctx| f(&mut ctx.borrow_mut()));
}
