//! Lexical environments, stored in an arena.
//!
//! Each scope record lives in [`Environments`] and is addressed by an
//! [`EnvId`] handle.  A record holds the handle of its enclosing record, so a
//! chain is walked by index.  Closures keep an `EnvId`, never a reference:
//! every closure holding the same handle sees every write made through it.
//!
//! Handles are reference counted.  When the last handle to a record goes away
//! its slot is queued for release; [`Environments::reclaim`] empties queued
//! records (which may release their ancestors in turn) and puts the slots on a
//! free list for [`Environments::push`] to recycle.  Nested records and
//! closures hold handles too, so a captured record outlives its block.
//! Records that only reach themselves (a function stored in the scope it
//! closes over) are not reclaimed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::error::RuntimeError;
use crate::token::Token;
use crate::value::Value;

type ReleaseQueue = Rc<RefCell<Vec<usize>>>;

/// Shared handle to one scope record.
#[derive(Clone)]
pub struct EnvId(Rc<Slot>);

struct Slot {
    index: usize,
    released: ReleaseQueue,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Ok(mut released) = self.released.try_borrow_mut() {
            released.push(self.index);
        }
    }
}

impl EnvId {
    fn index(&self) -> usize {
        self.0.index
    }
}

impl PartialEq for EnvId {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EnvId {}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({})", self.index())
    }
}

#[derive(Debug, Default)]
struct Scope<'a> {
    values: HashMap<&'a str, Value<'a>>,
    enclosing: Option<EnvId>,
}

/// Arena of scope records.  Index 0 is the global scope.
#[derive(Debug)]
pub struct Environments<'a> {
    scopes: Vec<Scope<'a>>,
    free: Vec<usize>,
    released: ReleaseQueue,
    global: EnvId,
}

impl<'a> Default for Environments<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Environments<'a> {
    pub fn new() -> Self {
        let released = ReleaseQueue::default();
        let global = EnvId(Rc::new(Slot {
            index: 0,
            released: Rc::clone(&released),
        }));

        Environments {
            scopes: vec![Scope::default()],
            free: Vec::new(),
            released,
            global,
        }
    }

    pub fn global(&self) -> EnvId {
        self.global.clone()
    }

    /// Open a fresh, empty scope chained to `enclosing`, reusing a released
    /// slot when there is one.
    pub fn push(&mut self, enclosing: &EnvId) -> EnvId {
        self.reclaim();

        let scope = Scope {
            values: HashMap::new(),
            enclosing: Some(enclosing.clone()),
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.scopes[index] = scope;
                index
            }
            None => {
                self.scopes.push(scope);
                self.scopes.len() - 1
            }
        };

        let id = EnvId(Rc::new(Slot {
            index,
            released: Rc::clone(&self.released),
        }));

        debug!("Opened scope {:?} enclosed by {:?}", id, enclosing);

        id
    }

    pub fn enclosing(&self, env: &EnvId) -> Option<EnvId> {
        self.scopes[env.index()].enclosing.clone()
    }

    /// Empty every record whose last handle is gone and make its slot
    /// reusable.  Emptying a record drops the handles it held, so whole
    /// chains go in one call.
    pub fn reclaim(&mut self) {
        loop {
            let next = self.released.borrow_mut().pop();
            let Some(index) = next else {
                break;
            };

            let stale = std::mem::take(&mut self.scopes[index]);
            self.free.push(index);
            drop(stale);

            debug!("Released scope slot {}", index);
        }
    }

    /// Number of scope records some handle still refers to.
    pub fn len(&self) -> usize {
        self.scopes.len() - self.free.len() - self.released.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in the arena, live or waiting to be recycled.
    pub fn allocated(&self) -> usize {
        self.scopes.len()
    }

    /// Insert or overwrite `name` in `env` itself.  Redefinition is legal here;
    /// duplicate declarations are the resolver's concern.
    pub fn define(&mut self, env: &EnvId, name: &'a str, value: Value<'a>) {
        self.scopes[env.index()].values.insert(name, value);
    }

    /// Look `name` up in `env`, then outward through the enclosing chain.
    pub fn get(&self, env: &EnvId, name: &Token<'_>) -> Result<Value<'a>, RuntimeError> {
        let mut cursor = Some(env.index());

        while let Some(index) = cursor {
            let scope = &self.scopes[index];

            if let Some(value) = scope.values.get(name.lexeme) {
                return Ok(value.clone());
            }

            cursor = scope.enclosing.as_ref().map(EnvId::index);
        }

        Err(undefined_variable(name))
    }

    /// Overwrite the nearest existing binding of `name`.  Never creates one.
    pub fn assign(
        &mut self,
        env: &EnvId,
        name: &Token<'_>,
        value: Value<'a>,
    ) -> Result<(), RuntimeError> {
        let mut cursor = Some(env.index());

        while let Some(index) = cursor {
            let scope = &mut self.scopes[index];

            if let Some(slot) = scope.values.get_mut(name.lexeme) {
                *slot = value;
                return Ok(());
            }

            cursor = scope.enclosing.as_ref().map(EnvId::index);
        }

        Err(undefined_variable(name))
    }

    /// Slot index reached by walking exactly `depth` enclosing links.
    fn ancestor(&self, env: &EnvId, depth: usize) -> usize {
        let mut index = env.index();

        for _ in 0..depth {
            match &self.scopes[index].enclosing {
                Some(parent) => index = parent.index(),
                None => break,
            }
        }

        index
    }

    /// Read `name` from the scope exactly `depth` hops out.  No name search
    /// happens at the intermediate levels.
    pub fn get_at(&self, env: &EnvId, depth: usize, name: &str) -> Option<Value<'a>> {
        let target = self.ancestor(env, depth);

        self.scopes[target].values.get(name).cloned()
    }

    /// Write `name` in the scope exactly `depth` hops out.
    pub fn assign_at(&mut self, env: &EnvId, depth: usize, name: &Token<'a>, value: Value<'a>) {
        let target = self.ancestor(env, depth);

        self.scopes[target].values.insert(name.lexeme, value);
    }
}

fn undefined_variable(name: &Token<'_>) -> RuntimeError {
    RuntimeError::new(name, format!("Undefined variable '{}'.", name.lexeme))
}
