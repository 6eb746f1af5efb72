//! Kernel-level functions and the dependency-resolving registry.
//!
//! A [`Function`] is identified by its name, the type hashes of its arguments and a hash of its
//! generated body. The registry keeps functions in an order where every callee precedes its
//! callers, which is the order GLSL requires definitions in.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Index;
use std::sync::Arc;

use log::debug;

use crate::errors::ShaderError;

/// Produces the full GLSL text of a function definition.
pub type CodeFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct Function {
    name: String,
    argument_hashes: Vec<u64>,
    code: CodeFn,
    content_hash: u64,
    dependencies: Vec<Function>,
}

impl Function {
    /// Creates a function from a code thunk. The thunk is run once to hash the body.
    pub fn new<F>(name: &str, argument_hashes: Vec<u64>, code: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let content_hash = hash_text(&code());
        Function {
            name: name.to_string(),
            argument_hashes,
            code: Arc::new(code),
            content_hash,
            dependencies: Vec::new(),
        }
    }

    /// Creates a function whose body is already rendered.
    pub fn from_code(name: &str, argument_hashes: Vec<u64>, code: String) -> Self {
        Function::new(name, argument_hashes, move || code.clone())
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Function>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument_hashes(&self) -> &[u64] {
        &self.argument_hashes
    }

    pub fn code(&self) -> String {
        (self.code)()
    }

    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    pub fn dependencies(&self) -> &[Function] {
        &self.dependencies
    }

    /// Same name and argument signature, regardless of body.
    pub fn same_signature(&self, other: &Function) -> bool {
        self.name == other.name && self.argument_hashes == other.argument_hashes
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.same_signature(other) && self.content_hash == other.content_hash
    }
}

impl Eq for Function {}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("argument_hashes", &self.argument_hashes)
            .field("content_hash", &self.content_hash)
            .field(
                "dependencies",
                &self.dependencies.iter().map(Function::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Deduplicated, dependency-ordered function list.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// Inserts `function` after all of its dependencies and returns its position.
    ///
    /// A function that is already present is not inserted again. Registering a function with
    /// the signature of an existing one but a different body fails with
    /// [`ShaderError::ConflictingFunction`].
    pub fn add(&mut self, function: &Function) -> Result<usize, ShaderError> {
        for dependency in function.dependencies() {
            self.add(dependency)?;
        }

        if let Some(position) = self.position(function) {
            if self.functions[position].content_hash != function.content_hash {
                return Err(ShaderError::ConflictingFunction(function.name.clone()));
            }
            return Ok(position);
        }

        debug!(
            "registering function '{}' at position {}",
            function.name,
            self.functions.len()
        );
        self.functions.push(function.clone());
        Ok(self.functions.len() - 1)
    }

    fn position(&self, function: &Function) -> Option<usize> {
        self.functions.iter().position(|f| f.same_signature(function))
    }

    pub fn get(&self, index: usize) -> Option<&Function> {
        self.functions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(Function::name).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Index<usize> for FunctionRegistry {
    type Output = Function;

    fn index(&self, index: usize) -> &Function {
        &self.functions[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, dependencies: Vec<Function>) -> Function {
        Function::from_code(name, vec![1, 2], format!("void {}() {{}}", name))
            .with_dependencies(dependencies)
    }

    #[test]
    fn test_dedup_and_order() {
        let g = function("g", vec![]);
        let f = function("f", vec![g.clone()]);
        let h = function("h", vec![]);

        let mut registry = FunctionRegistry::new();
        assert_eq!(registry.add(&f).unwrap(), 1);
        assert_eq!(registry.add(&h).unwrap(), 2);
        assert_eq!(registry.add(&f).unwrap(), 1);
        assert_eq!(registry.names(), vec!["g", "f", "h"]);
    }

    #[test]
    fn test_shared_dependency_once() {
        let base = function("base", vec![]);
        let left = function("left", vec![base.clone()]);
        let right = function("right", vec![base.clone()]);
        let top = function("top", vec![left, right]);

        let mut registry = FunctionRegistry::new();
        assert_eq!(registry.add(&top).unwrap(), 3);
        assert_eq!(registry.names(), vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn test_signature_distinguishes_overloads() {
        let a = Function::from_code("solve", vec![1], "void solve(float a) {}".into());
        let b = Function::from_code("solve", vec![2], "void solve(double a) {}".into());

        let mut registry = FunctionRegistry::new();
        registry.add(&a).unwrap();
        registry.add(&b).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_conflicting_body() {
        let a = Function::from_code("f", vec![1], "float f() { return 1.0; }".into());
        let b = Function::from_code("f", vec![1], "float f() { return 2.0; }".into());
        assert!(a.same_signature(&b));
        assert_ne!(a, b);

        let mut registry = FunctionRegistry::new();
        registry.add(&a).unwrap();
        assert!(matches!(
            registry.add(&b),
            Err(ShaderError::ConflictingFunction(name)) if name == "f"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_thunk_body() {
        let f = Function::new("f", vec![], || "void f() {}".to_string());
        assert_eq!(f.code(), "void f() {}");
        assert_eq!(
            f,
            Function::from_code("f", vec![], "void f() {}".to_string())
        );
    }
}
