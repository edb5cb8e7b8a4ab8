//! Advice, match rules and interception chains
//!
//! An [`Advisor`] pairs an [`Advice`] with an optional [`Pointcut`]. For a
//! given method of a given type, [`build_chain`] keeps the advisors whose
//! rules match and orders them by priority.

use crate::component::{ComponentType, Method};
use crate::proxy::Invocation;
use crate::value::{TypeKey, Value};
use crate::{DiError, Result};
use std::fmt;
use std::sync::Arc;

/// Around advice: decides whether and how to continue the invocation.
pub trait Interceptor: Send + Sync {
    fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<Value>;
}

/// Interceptor backed by a closure.
pub struct FnInterceptor<F>(pub F);

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut Invocation<'_>) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<Value> {
        (self.0)(invocation)
    }
}

// =============================================================================
// Match rules
// =============================================================================

/// Method half of a match rule.
pub trait MethodMatcher: Send + Sync {
    /// Static check against the method signature.
    fn matches(&self, method: &Method, target_type: &ComponentType) -> bool;

    /// Whether [`matches_call`](MethodMatcher::matches_call) must run on every call.
    fn is_runtime(&self) -> bool {
        false
    }

    /// Per-call check with the actual arguments; only consulted when
    /// [`is_runtime`](MethodMatcher::is_runtime) is true.
    fn matches_call(&self, _method: &Method, _target_type: &ComponentType, _args: &[Value]) -> bool {
        true
    }
}

/// Type half of a match rule.
#[derive(Clone, Default)]
pub enum ClassFilter {
    #[default]
    Any,
    /// Types assignable to any of the keys
    Types(Vec<TypeKey>),
    Custom(Arc<dyn Fn(&ComponentType) -> bool + Send + Sync>),
}

impl ClassFilter {
    pub fn matches(&self, component_type: &ComponentType) -> bool {
        match self {
            Self::Any => true,
            Self::Types(keys) => keys.iter().any(|key| component_type.is_assignable_to(key)),
            Self::Custom(filter) => filter(component_type),
        }
    }
}

impl fmt::Debug for ClassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Types(keys) => f.debug_tuple("Types").field(keys).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Class filter plus method matcher.
#[derive(Clone)]
pub struct Pointcut {
    class_filter: ClassFilter,
    matcher: Arc<dyn MethodMatcher>,
}

impl Pointcut {
    pub fn new(matcher: impl MethodMatcher + 'static) -> Self {
        Self {
            class_filter: ClassFilter::Any,
            matcher: Arc::new(matcher),
        }
    }

    /// Methods whose name matches one of `patterns`
    pub fn names<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(NameMatcher::new(patterns))
    }

    /// Only apply to types assignable to one of `keys`
    pub fn for_types(mut self, keys: impl IntoIterator<Item = TypeKey>) -> Self {
        self.class_filter = ClassFilter::Types(keys.into_iter().collect());
        self
    }

    pub fn with_class_filter(mut self, filter: ClassFilter) -> Self {
        self.class_filter = filter;
        self
    }

    #[inline]
    pub fn class_filter(&self) -> &ClassFilter {
        &self.class_filter
    }

    #[inline]
    pub fn matcher(&self) -> &Arc<dyn MethodMatcher> {
        &self.matcher
    }
}

impl fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointcut")
            .field("class_filter", &self.class_filter)
            .field("runtime", &self.matcher.is_runtime())
            .finish()
    }
}

/// `*` wildcard match: `set*`, `*Service`, `*cache*`, `a*b`.
pub fn simple_match(pattern: &str, text: &str) -> bool {
    let Some(first) = pattern.find('*') else {
        return pattern == text;
    };
    if first == 0 {
        if pattern.len() == 1 {
            return true;
        }
        let rest = &pattern[1..];
        let Some(next) = rest.find('*') else {
            return text.ends_with(rest);
        };
        let part = &rest[..next];
        let remaining = &rest[next..];
        if part.is_empty() {
            return simple_match(remaining, text);
        }
        let mut start = 0;
        while let Some(found) = text[start..].find(part) {
            let end = start + found + part.len();
            if simple_match(remaining, &text[end..]) {
                return true;
            }
            start += found + part.chars().next().map_or(1, char::len_utf8);
        }
        return false;
    }
    text.starts_with(&pattern[..first]) && simple_match(&pattern[first..], &text[first..])
}

/// Matches method names against `*` wildcard patterns; a pattern without
/// `*` is an exact name.
#[derive(Clone, Debug)]
pub struct NameMatcher {
    patterns: Vec<String>,
}

impl NameMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| simple_match(p, name))
    }
}

impl MethodMatcher for NameMatcher {
    fn matches(&self, method: &Method, _target_type: &ComponentType) -> bool {
        self.matches_name(method.name())
    }
}

/// Matches methods declared by capability `key`.
#[derive(Clone, Copy, Debug)]
pub struct CapabilityMatcher {
    key: TypeKey,
}

impl CapabilityMatcher {
    pub fn new(key: TypeKey) -> Self {
        Self { key }
    }

    pub fn of<I: ?Sized + 'static>() -> Self {
        Self::new(TypeKey::of::<I>())
    }
}

impl MethodMatcher for CapabilityMatcher {
    fn matches(&self, method: &Method, _target_type: &ComponentType) -> bool {
        method.declared_in() == Some(self.key)
    }
}

/// Static matcher backed by a closure.
pub struct FnMatcher<F>(pub F);

impl<F> MethodMatcher for FnMatcher<F>
where
    F: Fn(&Method, &ComponentType) -> bool + Send + Sync,
{
    fn matches(&self, method: &Method, target_type: &ComponentType) -> bool {
        (self.0)(method, target_type)
    }
}

/// Runtime matcher: a name pattern checked once, an argument predicate
/// checked on every call.
pub struct ArgumentMatcher<F> {
    names: NameMatcher,
    predicate: F,
}

impl<F> ArgumentMatcher<F>
where
    F: Fn(&[Value]) -> bool + Send + Sync,
{
    pub fn new(pattern: impl Into<String>, predicate: F) -> Self {
        Self {
            names: NameMatcher::new([pattern.into()]),
            predicate,
        }
    }
}

impl<F> MethodMatcher for ArgumentMatcher<F>
where
    F: Fn(&[Value]) -> bool + Send + Sync,
{
    fn matches(&self, method: &Method, target_type: &ComponentType) -> bool {
        self.names.matches(method, target_type)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_call(&self, _method: &Method, _target_type: &ComponentType, args: &[Value]) -> bool {
        (self.predicate)(args)
    }
}

// =============================================================================
// Advice
// =============================================================================

type BeforeFn = dyn Fn(&Invocation<'_>) -> Result<()> + Send + Sync;
type AfterReturningFn = dyn Fn(&Value, &Invocation<'_>) -> Result<()> + Send + Sync;
type AfterThrowingFn = dyn Fn(&DiError, &Invocation<'_>) + Send + Sync;

/// What runs around a matched method call.
#[derive(Clone)]
pub enum Advice {
    Around(Arc<dyn Interceptor>),
    /// Runs before the call; an error aborts it
    Before(Arc<BeforeFn>),
    /// Runs after a successful call
    AfterReturning(Arc<AfterReturningFn>),
    /// Observes a failed call; the error still propagates
    AfterThrowing(Arc<AfterThrowingFn>),
}

impl Advice {
    pub fn around<F>(f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Around(Arc::new(FnInterceptor(f)))
    }

    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::Before(Arc::new(f))
    }

    pub fn after_returning<F>(f: F) -> Self
    where
        F: Fn(&Value, &Invocation<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::AfterReturning(Arc::new(f))
    }

    pub fn after_throwing<F>(f: F) -> Self
    where
        F: Fn(&DiError, &Invocation<'_>) + Send + Sync + 'static,
    {
        Self::AfterThrowing(Arc::new(f))
    }

    /// Adapt any advice kind to an interceptor.
    pub fn to_interceptor(&self) -> Arc<dyn Interceptor> {
        match self {
            Self::Around(interceptor) => Arc::clone(interceptor),
            Self::Before(f) => Arc::new(BeforeInterceptor(Arc::clone(f))),
            Self::AfterReturning(f) => Arc::new(AfterReturningInterceptor(Arc::clone(f))),
            Self::AfterThrowing(f) => Arc::new(AfterThrowingInterceptor(Arc::clone(f))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Around(_) => "around",
            Self::Before(_) => "before",
            Self::AfterReturning(_) => "after-returning",
            Self::AfterThrowing(_) => "after-throwing",
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice::{}", self.kind())
    }
}

struct BeforeInterceptor(Arc<BeforeFn>);

impl Interceptor for BeforeInterceptor {
    fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<Value> {
        (self.0)(&*invocation)?;
        invocation.proceed()
    }
}

struct AfterReturningInterceptor(Arc<AfterReturningFn>);

impl Interceptor for AfterReturningInterceptor {
    fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<Value> {
        let value = invocation.proceed()?;
        (self.0)(&value, &*invocation)?;
        Ok(value)
    }
}

struct AfterThrowingInterceptor(Arc<AfterThrowingFn>);

impl Interceptor for AfterThrowingInterceptor {
    fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<Value> {
        invocation.proceed().inspect_err(|err| (self.0)(err, &*invocation))
    }
}

// =============================================================================
// Advisors and chains
// =============================================================================

/// Advice plus the rule deciding where it applies.
#[derive(Clone, Debug)]
pub struct Advisor {
    pointcut: Option<Pointcut>,
    advice: Advice,
    interceptor: Arc<dyn Interceptor>,
    order: Option<i32>,
}

impl Advisor {
    /// Advice applied to every method
    pub fn new(advice: Advice) -> Self {
        let interceptor = advice.to_interceptor();
        Self {
            pointcut: None,
            advice,
            interceptor,
            order: None,
        }
    }

    /// Advice applied where `pointcut` matches
    pub fn with_pointcut(pointcut: Pointcut, advice: Advice) -> Self {
        let mut advisor = Self::new(advice);
        advisor.pointcut = Some(pointcut);
        advisor
    }

    /// Priority; lower runs outer. Unordered advisors run last.
    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    #[inline]
    pub fn pointcut(&self) -> Option<&Pointcut> {
        self.pointcut.as_ref()
    }

    #[inline]
    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    #[inline]
    pub fn priority(&self) -> Option<i32> {
        self.order
    }

    fn sort_key(&self) -> i32 {
        self.order.unwrap_or(i32::MAX)
    }

    /// Whether the advisor matches any method of `component_type`.
    pub fn can_apply(&self, component_type: &ComponentType) -> bool {
        let Some(pointcut) = &self.pointcut else {
            return true;
        };
        pointcut.class_filter.matches(component_type)
            && component_type
                .methods()
                .iter()
                .any(|m| pointcut.matcher.matches(m, component_type))
    }
}

impl fmt::Debug for dyn Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interceptor")
    }
}

/// One step of an interception chain.
#[derive(Clone)]
pub struct ChainElement {
    pub(crate) interceptor: Arc<dyn Interceptor>,
    /// Re-checked with the actual arguments on every call
    pub(crate) runtime: Option<Arc<dyn MethodMatcher>>,
}

impl ChainElement {
    #[inline]
    pub fn is_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl fmt::Debug for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainElement")
            .field("runtime", &self.is_runtime())
            .finish()
    }
}

/// Interceptors that apply to `method` of `component_type`, outermost first.
///
/// With `pre_filtered` the class filters were already checked.
pub fn build_chain(
    advisors: &[Arc<Advisor>],
    method: &Method,
    component_type: &ComponentType,
    pre_filtered: bool,
) -> Vec<ChainElement> {
    let mut matched: Vec<(i32, ChainElement)> = Vec::with_capacity(advisors.len());
    for advisor in advisors {
        let runtime = match &advisor.pointcut {
            None => None,
            Some(pointcut) => {
                if !pre_filtered && !pointcut.class_filter.matches(component_type) {
                    continue;
                }
                if !pointcut.matcher.matches(method, component_type) {
                    continue;
                }
                pointcut
                    .matcher
                    .is_runtime()
                    .then(|| Arc::clone(&pointcut.matcher))
            }
        };
        matched.push((
            advisor.sort_key(),
            ChainElement {
                interceptor: Arc::clone(&advisor.interceptor),
                runtime,
            },
        ));
    }
    matched.sort_by_key(|(order, _)| *order);
    matched.into_iter().map(|(_, element)| element).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::MethodSpec;
    use crate::value::ValueType;

    trait Audited {}

    struct Account;

    fn account_type() -> Arc<ComponentType> {
        ComponentType::builder::<Account>()
            .implements::<dyn Audited>()
            .method(
                MethodSpec::new("deposit").param(ValueType::Int).declared_in::<dyn Audited>(),
                |_| Ok(Value::Null),
            )
            .method(MethodSpec::new("balance").returns(ValueType::Int), |_| Ok(Value::Int(0)))
            .method(MethodSpec::new("set_owner").param(ValueType::Str), |_| Ok(Value::Null))
            .build()
    }

    fn noop() -> Advice {
        Advice::around(|inv| inv.proceed())
    }

    #[test]
    fn test_simple_match() {
        assert!(simple_match("set*", "set_owner"));
        assert!(simple_match("*owner", "set_owner"));
        assert!(simple_match("*_own*", "set_owner"));
        assert!(simple_match("s*r", "set_owner"));
        assert!(simple_match("*", "anything"));
        assert!(simple_match("balance", "balance"));
        assert!(!simple_match("balance", "balances"));
        assert!(!simple_match("get*", "set_owner"));
        assert!(!simple_match("*x*", "set_owner"));
    }

    #[test]
    fn test_matchers() {
        let ty = account_type();
        let deposit = ty.find_method("deposit", 1).unwrap();
        let balance = ty.find_method("balance", 0).unwrap();

        assert!(NameMatcher::new(["dep*"]).matches(deposit, &ty));
        assert!(!NameMatcher::new(["dep*"]).matches(balance, &ty));
        assert!(CapabilityMatcher::of::<dyn Audited>().matches(deposit, &ty));
        assert!(!CapabilityMatcher::of::<dyn Audited>().matches(balance, &ty));
        assert!(FnMatcher(|m: &Method, _: &ComponentType| m.arity() == 0).matches(balance, &ty));
    }

    #[test]
    fn test_chain_selects_and_orders() {
        let ty = account_type();
        let deposit = ty.find_method("deposit", 1).unwrap();
        let balance = ty.find_method("balance", 0).unwrap();

        let advisors = vec![
            Arc::new(Advisor::new(noop())),
            Arc::new(Advisor::with_pointcut(Pointcut::names(["deposit"]), noop()).order(1)),
            Arc::new(Advisor::with_pointcut(Pointcut::names(["balance"]), noop())),
        ];

        let chain = build_chain(&advisors, deposit, &ty, false);
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain[0].interceptor, &advisors[1].interceptor));
        assert!(Arc::ptr_eq(&chain[1].interceptor, &advisors[0].interceptor));

        let chain = build_chain(&advisors, balance, &ty, false);
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain[0].interceptor, &advisors[0].interceptor));
    }

    #[test]
    fn test_class_filter_and_runtime_matcher() {
        let ty = account_type();
        let deposit = ty.find_method("deposit", 1).unwrap();

        let filtered = vec![Arc::new(Advisor::with_pointcut(
            Pointcut::names(["*"]).for_types([TypeKey::of::<String>()]),
            noop(),
        ))];
        assert!(build_chain(&filtered, deposit, &ty, false).is_empty());
        assert_eq!(build_chain(&filtered, deposit, &ty, true).len(), 1);
        assert!(!filtered[0].can_apply(&ty));

        let runtime = vec![Arc::new(Advisor::with_pointcut(
            Pointcut::new(ArgumentMatcher::new("deposit", |args: &[Value]| {
                args.first().and_then(Value::as_int).is_some_and(|v| v > 100)
            })),
            noop(),
        ))];
        let chain = build_chain(&runtime, deposit, &ty, false);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_runtime());
        assert!(runtime[0].can_apply(&ty));
    }
}
