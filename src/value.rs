//! Dynamic values, declared types and type conversion
//!
//! Components are stored type-erased as [`Instance`]. Everything that flows
//! through constructors, setters and proxied method calls is a [`Value`],
//! checked against a declared [`ValueType`].

use crate::{DiError, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type-erased managed object.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// `TypeId` of the concrete value behind an instance (not of the `Arc`).
#[inline]
pub fn instance_type_id(instance: &Instance) -> TypeId {
    (**instance).type_id()
}

/// Identity comparison that ignores vtable pointers.
#[inline]
pub fn same_instance(a: &Instance, b: &Instance) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Address of an instance, usable as a map key.
#[inline]
pub(crate) fn instance_addr(instance: &Instance) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

/// Identity of a Rust type, usable for concrete types and trait objects.
///
/// Capabilities ("interfaces") are keyed by trait-object types:
///
/// ```rust
/// use component_container::TypeKey;
///
/// trait Greeter {}
/// struct English;
///
/// let capability = TypeKey::of::<dyn Greeter>();
/// assert_ne!(capability, TypeKey::of::<English>());
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for any `'static` type, including `dyn Trait`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full type name for diagnostics
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declared type of a parameter, property or method return.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value (method returns only)
    Unit,
    Bool,
    Int,
    Float,
    Str,
    /// A managed object assignable to the given type or capability
    Component(TypeKey),
    /// A collection; autowiring collects every match
    List(Box<ValueType>),
    /// Accepts anything
    Any,
}

impl ValueType {
    /// `Component` type for `T` (concrete type or `dyn Trait`)
    #[inline]
    pub fn component<T: ?Sized + 'static>() -> Self {
        Self::Component(TypeKey::of::<T>())
    }

    /// `List` of the given element type
    #[inline]
    pub fn list_of(element: ValueType) -> Self {
        Self::List(Box::new(element))
    }

    /// Primitive-like types that can never hold `Null`
    #[inline]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float)
    }

    /// Types never considered for autowiring (primitives and strings, and lists of them)
    pub fn is_simple(&self) -> bool {
        match self {
            Self::Unit | Self::Bool | Self::Int | Self::Float | Self::Str => true,
            Self::List(element) => element.is_simple(),
            Self::Component(_) | Self::Any => false,
        }
    }

    /// Container-typed (collection) values
    #[inline]
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Human-readable name used in error messages
    pub fn display_name(&self) -> String {
        match self {
            Self::Unit => "()".into(),
            Self::Bool => "bool".into(),
            Self::Int => "int".into(),
            Self::Float => "float".into(),
            Self::Str => "string".into(),
            Self::Component(key) => key.name().to_string(),
            Self::List(element) => format!("list<{}>", element.display_name()),
            Self::Any => "any".into(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// A dynamic value: literal, list or managed object.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(Instance),
}

impl Value {
    /// Wrap a value as a managed object
    #[inline]
    pub fn object<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    /// Wrap an existing `Arc` without re-allocating
    #[inline]
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::Object(value)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the value's kind for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Object(instance) => Some(instance),
            _ => None,
        }
    }

    /// Downcast an object value to its concrete type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        match self {
            Self::Object(instance) => Arc::clone(instance).downcast::<T>().map_err(|_| {
                DiError::type_mismatch("value", std::any::type_name::<T>(), "object of another type")
            }),
            other => Err(DiError::type_mismatch(
                "value",
                std::any::type_name::<T>(),
                other.kind_name(),
            )),
        }
    }

    /// Borrow the concrete value behind an object without cloning the `Arc`.
    pub fn downcast_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.as_instance().and_then(|i| (**i).downcast_ref::<T>())
    }

    /// True if this value is the given instance (by identity)
    #[inline]
    pub fn is_instance(&self, instance: &Instance) -> bool {
        matches!(self, Self::Object(own) if same_instance(own, instance))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => same_instance(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Object(instance) => write!(f, "Object({:#x})", instance_addr(instance)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Self::Object(v)
    }
}

/// Answers type questions about live instances.
///
/// The container implements this using registered component types; a
/// forwarding proxy is assignable to every type it exposes.
pub trait TypeLookup {
    /// Distance from the instance's type to `key` (0 = exact), or `None`
    /// if the instance is not assignable.
    fn assignable_distance(&self, instance: &Instance, key: &TypeKey) -> Option<u32>;

    /// Display name of the instance's type
    fn type_name_of(&self, instance: &Instance) -> String;
}

/// Lookup used when no container is at hand: only exact concrete types match.
struct ExactTypes;

impl TypeLookup for ExactTypes {
    fn assignable_distance(&self, instance: &Instance, key: &TypeKey) -> Option<u32> {
        (instance_type_id(instance) == key.id()).then_some(0)
    }

    fn type_name_of(&self, _instance: &Instance) -> String {
        "object".into()
    }
}

/// Weight assigned to a value bound to an `Any`-typed slot or widened.
const LOOSE_MATCH: u32 = 3;

/// Converts bound values to declared types and scores how well they fit.
pub struct TypeConverter<'a> {
    lookup: &'a dyn TypeLookup,
}

impl<'a> TypeConverter<'a> {
    /// Converter backed by a type lookup (normally the container)
    #[inline]
    pub fn new(lookup: &'a dyn TypeLookup) -> Self {
        Self { lookup }
    }

    /// Convert `value` to `target`; `context` names the slot for error messages.
    pub fn convert(&self, value: Value, target: &ValueType, context: &str) -> Result<Value> {
        let mismatch = |value: &Value| {
            DiError::type_mismatch(context, target.display_name(), self.describe(value))
        };

        match (target, value) {
            (ValueType::Any, value) => Ok(value),
            (ValueType::Unit, Value::Null) => Ok(Value::Null),
            (target, Value::Null) if !target.is_primitive() => Ok(Value::Null),

            (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueType::Bool, Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&Value::Str(s))),
            },

            (ValueType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ValueType::Int, Value::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| mismatch(&Value::Str(s))),

            (ValueType::Float, Value::Float(x)) => Ok(Value::Float(x)),
            (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ValueType::Float, Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch(&Value::Str(s))),

            (ValueType::Str, Value::Str(s)) => Ok(Value::Str(s)),
            (ValueType::Str, Value::Int(i)) => Ok(Value::Str(i.to_string())),
            (ValueType::Str, Value::Float(x)) => Ok(Value::Str(x.to_string())),
            (ValueType::Str, Value::Bool(b)) => Ok(Value::Str(b.to_string())),

            (ValueType::Component(key), Value::Object(instance)) => {
                if self.lookup.assignable_distance(&instance, key).is_some() {
                    Ok(Value::Object(instance))
                } else {
                    Err(mismatch(&Value::Object(instance)))
                }
            }

            (ValueType::List(element), Value::List(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.convert(item, element, &format!("{context}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            (ValueType::List(element), single) => {
                let converted = self.convert(single, element, &format!("{context}[0]"))?;
                Ok(Value::List(vec![converted]))
            }

            (_, value) => Err(mismatch(&value)),
        }
    }

    /// How far `value` is from `target` without conversion (lower is closer).
    ///
    /// `None` means the value is not assignable as-is.
    pub fn type_distance(&self, value: &Value, target: &ValueType) -> Option<u32> {
        match (target, value) {
            (ValueType::Any, _) => Some(LOOSE_MATCH),
            (target, Value::Null) => (!target.is_primitive()).then_some(0),
            (ValueType::Bool, Value::Bool(_))
            | (ValueType::Int, Value::Int(_))
            | (ValueType::Float, Value::Float(_))
            | (ValueType::Str, Value::Str(_)) => Some(0),
            (ValueType::Float, Value::Int(_)) => Some(LOOSE_MATCH),
            (ValueType::Component(key), Value::Object(instance)) => {
                self.lookup.assignable_distance(instance, key)
            }
            (ValueType::List(element), Value::List(items)) => items
                .iter()
                .map(|item| self.type_distance(item, element))
                .try_fold(0u32, |acc, d| d.map(|d| acc.max(d))),
            _ => None,
        }
    }

    fn describe(&self, value: &Value) -> String {
        match value {
            Value::Object(instance) => self.lookup.type_name_of(instance),
            other => other.kind_name().to_string(),
        }
    }
}

impl Default for TypeConverter<'static> {
    fn default() -> Self {
        Self { lookup: &ExactTypes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    #[test]
    fn test_literal_conversion() {
        let converter = TypeConverter::default();

        assert_eq!(
            converter.convert("42".into(), &ValueType::Int, "x").unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            converter.convert("on".into(), &ValueType::Bool, "x").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            converter.convert(Value::Int(2), &ValueType::Float, "x").unwrap(),
            Value::Float(2.0)
        );
        assert_eq!(
            converter.convert(Value::Int(7), &ValueType::Str, "x").unwrap(),
            Value::Str("7".into())
        );
    }

    #[test]
    fn test_conversion_failure_names_context() {
        let converter = TypeConverter::default();
        let err = converter
            .convert("abc".into(), &ValueType::Int, "service.port")
            .unwrap_err();
        match err {
            DiError::TypeMismatch { context, .. } => assert_eq!(context, "service.port"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_rejected_for_primitives_only() {
        let converter = TypeConverter::default();
        assert!(converter.convert(Value::Null, &ValueType::Int, "x").is_err());
        assert!(converter.convert(Value::Null, &ValueType::Str, "x").is_ok());
        assert!(
            converter
                .convert(Value::Null, &ValueType::component::<Widget>(), "x")
                .is_ok()
        );
    }

    #[test]
    fn test_single_value_becomes_list() {
        let converter = TypeConverter::default();
        let converted = converter
            .convert("5".into(), &ValueType::list_of(ValueType::Int), "x")
            .unwrap();
        assert_eq!(converted, Value::List(vec![Value::Int(5)]));
    }

    #[test]
    fn test_object_assignability() {
        let converter = TypeConverter::default();
        let widget = Value::object(Widget);

        assert_eq!(
            converter.type_distance(&widget, &ValueType::component::<Widget>()),
            Some(0)
        );
        assert_eq!(
            converter.type_distance(&widget, &ValueType::component::<String>()),
            None
        );
        assert!(
            converter
                .convert(widget, &ValueType::component::<String>(), "x")
                .is_err()
        );
    }

    #[test]
    fn test_distance_prefers_exact_literals() {
        let converter = TypeConverter::default();
        assert_eq!(converter.type_distance(&Value::Int(1), &ValueType::Int), Some(0));
        assert_eq!(converter.type_distance(&Value::Int(1), &ValueType::Float), Some(3));
        assert_eq!(converter.type_distance(&"1".into(), &ValueType::Int), None);
    }

    #[test]
    fn test_value_identity_equality() {
        let shared: Instance = Arc::new(Widget);
        let a = Value::Object(Arc::clone(&shared));
        let b = Value::Object(shared);
        assert_eq!(a, b);
        assert_ne!(a, Value::object(Widget));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(TypeKey::of::<Widget>().short_name(), "Widget");
    }
}
