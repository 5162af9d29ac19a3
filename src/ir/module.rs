//! Module-level IR: global variables and the functions they sit beside.

use super::function::Function;
use super::types::DataType;

/// Initial contents of a global.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// All-zero object, emitted into `.bss`.
    Zeroed,
    /// Explicit 32-bit words in element order. Floats are stored as their
    /// raw bit patterns.
    Words(Vec<i32>),
}

/// Module-level variable. Scalars have empty `dims`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub ty: DataType,
    pub dims: Vec<u32>,
    pub init: GlobalInit,
}

impl GlobalVar {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
            dims: Vec::new(),
            init: GlobalInit::Zeroed,
        }
    }

    pub fn with_dims(mut self, dims: Vec<u32>) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_words(mut self, words: Vec<i32>) -> Self {
        self.init = GlobalInit::Words(words);
        self
    }

    /// Number of scalar elements in the object.
    pub fn element_count(&self) -> u32 {
        self.dims.iter().product::<u32>().max(1)
    }

    /// Total object size in bytes.
    pub fn size_bytes(&self) -> u32 {
        self.element_count() * self.ty.size_bytes()
    }
}

/// Input IR module: ordered globals followed by ordered functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&mut self, global: GlobalVar) {
        self.globals.push(global);
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for func in &self.functions {
            if let Err(e) = func.validate() {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_sizes() {
        let scalar = GlobalVar::new("g", DataType::I32);
        assert_eq!(scalar.element_count(), 1);
        assert_eq!(scalar.size_bytes(), 4);

        let arr = GlobalVar::new("a", DataType::I32).with_dims(vec![4, 8]);
        assert_eq!(arr.element_count(), 32);
        assert_eq!(arr.size_bytes(), 128);
    }

    #[test]
    fn test_module_lookup() {
        let mut module = Module::new();
        module.add_function(Function::new("main"));
        assert!(module.get_function("main").is_some());
        assert!(module.get_function("missing").is_none());
    }
}
