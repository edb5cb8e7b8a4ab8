//! Derive macros for component-container
//!
//! - `#[derive(Component)]` - Generate `component_type()` describing the
//!   struct to the container
//!
//! # Example
//!
//! ```rust,ignore
//! use component_container::{Component, Container, Descriptor};
//! use once_cell::sync::OnceCell;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Database;
//!
//! #[derive(Component)]
//! struct UserService {
//!     #[inject(required)]
//!     db: OnceCell<Arc<Database>>,
//!     // Non-injected fields use Default
//!     request_count: u64,
//! }
//!
//! let container = Container::new();
//! container.register_instance("db", Database).unwrap();
//! container
//!     .register_definition("users", Descriptor::new(UserService::component_type()))
//!     .unwrap();
//!
//! let users = container.get_typed::<UserService>("users").unwrap();
//! assert!(users.db.get().is_some());
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type, parse_macro_input};

/// Derive macro describing a struct as a managed component.
///
/// Generates `component_type()` returning the struct's
/// `ComponentType`: a zero-argument constructor that fills every field
/// with `Default::default()`, plus one property per injected field.
///
/// # Attributes
///
/// - `#[inject]` - Optional dependency, resolved by type. The field must be
///   `OnceCell<Arc<T>>` for a concrete `T`.
/// - `#[inject(required)]` - Same, but creation fails when no unique
///   instance of `T` exists.
#[proc_macro_derive(Component, attributes(inject))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "Component can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "Component can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let mut field_inits = Vec::new();
    let mut properties = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        field_inits.push(quote! {
            #field_name: ::std::default::Default::default()
        });

        let Some(required) = find_inject_attr(&field.attrs) else {
            continue;
        };
        let Some(inner_type) = extract_once_cell_arc_inner_type(&field.ty) else {
            return syn::Error::new_spanned(
                &field.ty,
                "Fields marked with #[inject] must have type OnceCell<Arc<T>>",
            )
            .to_compile_error()
            .into();
        };

        let property_name = field_name.to_string();
        properties.push(quote! {
            .autowired_property(
                #property_name,
                ::component_container::ValueType::component::<#inner_type>(),
                #required,
                |this: &Self, value: ::component_container::Value| {
                    let _ = this.#field_name.set(value.downcast::<#inner_type>()?);
                    Ok(())
                },
            )
        });
    }

    let expanded = quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            /// Container metadata for this type.
            pub fn component_type() -> ::std::sync::Arc<::component_container::ComponentType> {
                ::component_container::ComponentType::builder::<Self>()
                    .constructor([], |_| {
                        Ok(Self {
                            #(#field_inits),*
                        })
                    })
                    #(#properties)*
                    .build()
            }
        }
    };

    TokenStream::from(expanded)
}

/// `Some(required)` for a field carrying `#[inject]` or `#[inject(required)]`
fn find_inject_attr(attrs: &[Attribute]) -> Option<bool> {
    let attr = attrs.iter().find(|attr| attr.path().is_ident("inject"))?;
    if attr.meta.require_path_only().is_ok() {
        return Some(false);
    }
    Some(
        attr.parse_args::<syn::Ident>()
            .is_ok_and(|nested| nested == "required"),
    )
}

/// First generic argument of a path type whose last segment is `wrapper`
fn unwrap_generic<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

/// Extract T from OnceCell<Arc<T>>
fn extract_once_cell_arc_inner_type(ty: &Type) -> Option<&Type> {
    unwrap_generic(unwrap_generic(ty, "OnceCell")?, "Arc")
}
