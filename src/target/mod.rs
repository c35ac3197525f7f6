use std::{cell::RefCell, collections::BTreeMap, fmt, marker::PhantomData};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Llvm,
    Cuda,
    OpenCl,
    Metal,
    Vulkan,
}

impl TargetKind {
    pub fn name(&self) -> &'static str {
        match self {
            TargetKind::Llvm => "llvm",
            TargetKind::Cuda => "cuda",
            TargetKind::OpenCl => "opencl",
            TargetKind::Metal => "metal",
            TargetKind::Vulkan => "vulkan",
        }
    }

    fn default_keys(&self) -> Vec<String> {
        let keys: &[&str] = match self {
            TargetKind::Llvm => &["cpu"],
            TargetKind::Cuda => &["cuda", "gpu"],
            TargetKind::OpenCl => &["opencl", "gpu"],
            TargetKind::Metal => &["metal", "gpu"],
            TargetKind::Vulkan => &["vulkan", "gpu"],
        };
        keys.iter().map(|key| key.to_string()).collect()
    }
}

/// Compilation target: device kind, dispatch keys and free-form options.
///
/// Equality is structural over all three.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    kind: TargetKind,
    keys: Vec<String>,
    attrs: BTreeMap<String, String>,
}

thread_local! {
    static TARGET_STACK: RefCell<Vec<Target>> = RefCell::new(vec![]);
}

impl Target {
    pub fn new(kind: TargetKind) -> Self {
        Target {
            kind,
            keys: kind.default_keys(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn llvm() -> Self {
        Target::new(TargetKind::Llvm)
    }

    pub fn cuda() -> Self {
        Target::new(TargetKind::Cuda)
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Make this the active target on the current thread until the guard drops.
    pub fn enter(&self) -> TargetScope {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        TargetScope {
            _not_send: PhantomData,
        }
    }

    /// Innermost active target on the current thread.
    pub fn current() -> Option<Target> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name())?;
        for (key, value) in &self.attrs {
            write!(f, " -{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Guard returned by [`Target::enter`]; pops the target when dropped.
pub struct TargetScope {
    _not_send: PhantomData<*const ()>,
}

impl Drop for TargetScope {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
