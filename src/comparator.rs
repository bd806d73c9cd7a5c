//! Named key comparators
//!
//! A database may order its keys with a user-supplied three-way comparison
//! function instead of the default byte-lexicographic order. Comparators are
//! registered by name on the provider, either programmatically or resolved
//! from a shared library at configuration time; once a database is attached
//! the function pointer never changes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::Arc;

use crate::error::{KvError, KvResult};

/// Raw three-way comparison over two byte ranges: negative, zero, or
/// positive like `memcmp`.
pub type RawCompareFn = unsafe extern "C" fn(*const u8, usize, *const u8, usize) -> i32;

/// A registered comparison function.
///
/// Holds the library that exported the symbol (when there is one) so the
/// code stays mapped for as long as any database uses it.
#[derive(Clone)]
pub struct Comparator {
    name: String,
    func: RawCompareFn,
    _library: Option<Arc<Library>>,
}

impl Comparator {
    /// Wrap a function defined in this process.
    pub fn new(name: &str, func: RawCompareFn) -> Self {
        Comparator {
            name: name.to_string(),
            func,
            _library: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Three-way comparison of two keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let r = unsafe { (self.func)(a.as_ptr(), a.len(), b.as_ptr(), b.len()) };
        r.cmp(&0)
    }

    /// Same function pointer?
    pub fn same_function(&self, other: &Comparator) -> bool {
        self.func as usize == other.func as usize
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Comparator({})", self.name)
    }
}

/// Name → comparator map owned by a provider.
///
/// Registration conflicts on the same name with a different function are
/// rejected; re-registering the identical function is accepted.
#[derive(Default)]
pub struct ComparatorRegistry {
    functions: HashMap<String, Comparator>,
}

impl ComparatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a comparator defined in this process.
    pub fn add(&mut self, name: &str, func: RawCompareFn) -> KvResult<()> {
        self.insert(Comparator::new(name, func))
    }

    /// Resolve `name` from `library` and register it. An empty library
    /// string resolves in the process's own symbol table.
    pub fn resolve(&mut self, library: &str, name: &str) -> KvResult<()> {
        let lib = if library.is_empty() {
            Library::open_self()
        } else {
            Library::open(library)
        }
        .ok_or(KvError::ComparisonFunction)?;
        let func: RawCompareFn = lib.symbol(name).ok_or(KvError::ComparisonFunction)?;
        self.insert(Comparator {
            name: name.to_string(),
            func,
            _library: Some(Arc::new(lib)),
        })
    }

    fn insert(&mut self, comparator: Comparator) -> KvResult<()> {
        if let Some(existing) = self.functions.get(comparator.name()) {
            if existing.same_function(&comparator) {
                return Ok(());
            }
            tracing::error!(
                name = comparator.name(),
                "another comparison function is already registered under this name"
            );
            return Err(KvError::ComparisonFunction);
        }
        self.functions.insert(comparator.name().to_string(), comparator);
        Ok(())
    }

    /// Look up a comparator by name. An empty name means the default order
    /// and yields `None`.
    pub fn find(&self, name: &str) -> Option<Comparator> {
        if name.is_empty() {
            return None;
        }
        self.functions.get(name).cloned()
    }
}

/// Minimal RAII dynamic-library handle.
pub struct Library {
    handle: *mut c_void,
    owned: bool,
}

// The handle is only used for symbol lookup and close.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Open a shared library by path.
    pub fn open(path: &str) -> Option<Self> {
        let c_path = CString::new(path).ok()?;
        let handle = unsafe { platform::open(c_path.as_ptr()) };
        if handle.is_null() {
            tracing::error!(path, "could not open shared library");
            return None;
        }
        Some(Library { handle, owned: true })
    }

    /// Handle on the process's own symbol table.
    pub fn open_self() -> Option<Self> {
        let handle = unsafe { platform::open_self() };
        if handle.is_null() {
            return None;
        }
        Some(Library {
            handle,
            owned: false,
        })
    }

    /// Fetch a typed symbol.
    pub fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
        let c_name = CString::new(name).ok()?;
        let ptr = unsafe { platform::symbol(self.handle, c_name.as_ptr()) };
        if ptr.is_null() {
            tracing::error!(name, "could not find symbol");
            return None;
        }
        Some(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&ptr) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if self.owned && !self.handle.is_null() {
            unsafe {
                platform::close(self.handle);
            }
        }
    }
}

#[cfg(unix)]
mod platform {
    use super::*;

    const RTLD_NOW: c_int = 2;

    pub unsafe fn open(path: *const c_char) -> *mut c_void {
        dlopen(path, RTLD_NOW)
    }

    pub unsafe fn open_self() -> *mut c_void {
        dlopen(std::ptr::null(), RTLD_NOW)
    }

    pub unsafe fn symbol(handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
        dlsym(handle, symbol)
    }

    pub unsafe fn close(handle: *mut c_void) -> c_int {
        dlclose(handle)
    }

    extern "C" {
        fn dlopen(filename: *const c_char, flag: c_int) -> *mut c_void;
        fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
        fn dlclose(handle: *mut c_void) -> c_int;
    }
}

#[cfg(not(unix))]
mod platform {
    use super::*;

    pub unsafe fn open(_path: *const c_char) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub unsafe fn open_self() -> *mut c_void {
        std::ptr::null_mut()
    }

    pub unsafe fn symbol(_handle: *mut c_void, _symbol: *const c_char) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub unsafe fn close(_handle: *mut c_void) -> c_int {
        0
    }
}
