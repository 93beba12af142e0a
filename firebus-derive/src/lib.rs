//! Derive and attribute macros for firebus.
//!
//! - `#[derive(Event)]` implements `firebus::Event` for a struct or enum.
//! - `#[listener]` on an inherent `impl` block implements `firebus::Listener`
//!   from the methods marked `#[subscribe]` or
//!   `#[subscribe(priority = Early)]`.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::spanned::Spanned;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Error, FnArg, Ident, ImplItem, ImplItemFn,
    ItemImpl, LitStr, Meta, Path, Type, Visibility,
};

/// Derives the Event trait for structs and enums.
///
/// The generated implementation names the event after the type itself and
/// keeps the trait's defaults for everything else. Implement the trait by
/// hand to add validation.
///
/// # Examples
///
/// ## Basic struct
///
/// ```rust
/// use firebus::Event;
///
/// #[derive(Event, Debug)]
/// struct UserLoggedIn {
///     user_id: u64,
/// }
///
/// assert_eq!(UserLoggedIn::event_type_name(), "UserLoggedIn");
/// ```
///
/// ## Enum events
///
/// ```rust
/// use firebus::Event;
///
/// #[derive(Event, Debug)]
/// enum NetworkEvent {
///     Connected { peer_id: String },
///     Disconnected { peer_id: String, reason: String },
/// }
/// ```
#[proc_macro_derive(Event)]
pub fn derive_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_event(&input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

/// Implements `firebus::Listener` for the type of an inherent `impl` block.
///
/// Every method marked `#[subscribe]` becomes a handler. A handler must be
/// `pub`, take `&self` and exactly one event by shared reference, and return
/// `()` or `Result<(), E>`. The priority defaults to `Normal`.
///
/// # Examples
///
/// ```rust
/// use firebus::{listener, Event};
///
/// #[derive(Event)]
/// struct Ping;
///
/// #[derive(Event)]
/// struct Shutdown;
///
/// struct Watchdog;
///
/// #[listener]
/// impl Watchdog {
///     #[subscribe(priority = First)]
///     pub fn on_ping(&self, _event: &Ping) {}
///
///     #[subscribe]
///     pub fn on_shutdown(&self, _event: &Shutdown) -> Result<(), std::io::Error> {
///         Ok(())
///     }
///
///     // Not a handler.
///     pub fn status(&self) -> &'static str {
///         "ok"
///     }
/// }
/// ```
///
/// Private methods cannot be handlers:
///
/// ```compile_fail
/// use firebus::{listener, Event};
///
/// #[derive(Event)]
/// struct Ping;
///
/// struct Hidden;
///
/// #[listener]
/// impl Hidden {
///     #[subscribe]
///     fn on_ping(&self, _event: &Ping) {}
/// }
/// ```
#[proc_macro_attribute]
pub fn listener(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = TokenStream2::from(args);
    let item = parse_macro_input!(input as ItemImpl);
    expand_listener(args, item)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

fn expand_event(input: &DeriveInput) -> syn::Result<TokenStream2> {
    check_event_shape(input)?;

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::firebus::Event for #name #ty_generics #where_clause {
            fn event_type_name() -> &'static str {
                stringify!(#name)
            }
        }
    })
}

fn check_event_shape(input: &DeriveInput) -> syn::Result<()> {
    match &input.data {
        Data::Struct(_) | Data::Enum(_) => Ok(()),
        Data::Union(_) => Err(Error::new_spanned(
            &input.ident,
            "Event cannot be derived for union types",
        )),
    }
}

const PRIORITIES: [&str; 5] = ["First", "Early", "Normal", "Late", "Last"];

fn expand_listener(args: TokenStream2, mut item: ItemImpl) -> syn::Result<TokenStream2> {
    if !args.is_empty() {
        return Err(Error::new_spanned(args, "#[listener] takes no arguments"));
    }
    if let Some((_, path, _)) = &item.trait_ {
        return Err(Error::new_spanned(
            path,
            "#[listener] must be placed on an inherent impl block",
        ));
    }

    let mut bindings = Vec::new();
    for impl_item in &mut item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        if let Some(priority) = take_subscribe_attr(method)? {
            bindings.push(expand_binding(method, &priority)?);
        }
    }

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();

    Ok(quote! {
        #item

        impl #impl_generics ::firebus::Listener for #self_ty #where_clause {
            #[allow(unused_variables)]
            fn bind(binder: &mut ::firebus::Binder<Self>) {
                #(#bindings)*
            }
        }
    })
}

/// Strips `#[subscribe]` from `method` and returns the requested priority.
fn take_subscribe_attr(method: &mut ImplItemFn) -> syn::Result<Option<Ident>> {
    let mut priority = None;
    let mut kept = Vec::with_capacity(method.attrs.len());

    for attr in method.attrs.drain(..) {
        if !attr.path().is_ident("subscribe") {
            kept.push(attr);
            continue;
        }
        if priority.is_some() {
            return Err(Error::new_spanned(&attr, "duplicate #[subscribe] attribute"));
        }
        priority = Some(parse_subscribe(&attr)?);
    }

    method.attrs = kept;
    Ok(priority)
}

fn parse_subscribe(attr: &Attribute) -> syn::Result<Ident> {
    let mut priority = None;

    match &attr.meta {
        Meta::Path(_) => {}
        Meta::List(_) => attr.parse_nested_meta(|meta| {
            if !meta.path.is_ident("priority") {
                return Err(meta.error("unsupported subscribe option, expected `priority`"));
            }
            if priority.is_some() {
                return Err(meta.error("duplicate `priority`"));
            }

            let value = meta.value()?;
            let (name, span) = if value.peek(LitStr) {
                let lit: LitStr = value.parse()?;
                (lit.value(), lit.span())
            } else {
                let path: Path = value.parse()?;
                let last = path
                    .segments
                    .last()
                    .ok_or_else(|| Error::new_spanned(&path, "expected a priority"))?;
                (last.ident.to_string(), path.span())
            };
            priority = Some(priority_ident(&name, span)?);
            Ok(())
        })?,
        Meta::NameValue(_) => {
            return Err(Error::new_spanned(
                attr,
                "expected #[subscribe] or #[subscribe(priority = ...)]",
            ))
        }
    }

    Ok(priority.unwrap_or_else(|| Ident::new("Normal", attr.span())))
}

fn priority_ident(name: &str, span: Span) -> syn::Result<Ident> {
    PRIORITIES
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
        .map(|canonical| Ident::new(canonical, span))
        .ok_or_else(|| {
            Error::new(
                span,
                format!(
                    "unknown priority `{name}`, expected one of {}",
                    PRIORITIES.join(", ")
                ),
            )
        })
}

fn expand_binding(method: &ImplItemFn, priority: &Ident) -> syn::Result<TokenStream2> {
    let sig = &method.sig;
    let name = &sig.ident;

    if !matches!(method.vis, Visibility::Public(_)) {
        return Err(Error::new_spanned(
            sig.fn_token,
            "#[subscribe] handlers must be `pub`",
        ));
    }
    if let Some(asyncness) = sig.asyncness {
        return Err(Error::new_spanned(
            asyncness,
            "#[subscribe] handlers cannot be async",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &sig.generics,
            "#[subscribe] handlers cannot be generic",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(Error::new_spanned(
                &sig.inputs,
                "#[subscribe] handlers must take `&self`",
            ))
        }
    }

    let event_ty = match (inputs.next(), inputs.next()) {
        (Some(FnArg::Typed(arg)), None) => match &*arg.ty {
            Type::Reference(reference) if reference.mutability.is_none() => &reference.elem,
            other => {
                return Err(Error::new_spanned(
                    other,
                    "the event must be taken by shared reference, like `&MyEvent`",
                ))
            }
        },
        _ => {
            return Err(Error::new_spanned(
                &sig.inputs,
                "#[subscribe] handlers take exactly one event argument",
            ))
        }
    };

    Ok(quote! {
        binder.subscribe::<#event_ty, _, _>(
            ::firebus::PostOrder::#priority,
            stringify!(#name),
            |this: &Self, event: &#event_ty| Self::#name(this, event),
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn expand(item: ItemImpl) -> syn::Result<syn::File> {
        expand_listener(TokenStream2::new(), item).and_then(syn::parse2::<syn::File>)
    }

    fn error_of(item: ItemImpl) -> String {
        match expand_listener(TokenStream2::new(), item) {
            Ok(_) => panic!("expected expansion to fail"),
            Err(error) => error.to_string(),
        }
    }

    #[test]
    fn test_derive_event_on_struct_and_enum() {
        let input: DeriveInput = parse_quote! {
            struct Ping { sequence: u64 }
        };
        assert!(expand_event(&input).is_ok());

        let input: DeriveInput = parse_quote! {
            enum Network { Up, Down }
        };
        assert!(expand_event(&input).is_ok());
    }

    #[test]
    fn test_union_rejection() {
        let input: DeriveInput = parse_quote! {
            union Raw { a: i32, b: f32 }
        };
        assert!(expand_event(&input).is_err());
    }

    #[test]
    fn test_listener_binds_subscribed_methods_only() {
        let file = expand(parse_quote! {
            impl Audit {
                #[subscribe(priority = Early)]
                pub fn first(&self, event: &Ping) {}

                #[subscribe]
                pub fn second(&self, event: &Ping) -> Result<(), Oops> { Ok(()) }

                pub fn helper(&self) {}
            }
        })
        .unwrap();

        assert_eq!(file.items.len(), 2);

        let syn::Item::Impl(inherent) = &file.items[0] else {
            panic!("expected the original impl block first");
        };
        for item in &inherent.items {
            let ImplItem::Fn(method) = item else {
                continue;
            };
            assert!(method.attrs.is_empty(), "subscribe attribute left behind");
        }

        let syn::Item::Impl(listener) = &file.items[1] else {
            panic!("expected a Listener impl");
        };
        let rendered = quote!(#listener).to_string();
        assert!(rendered.contains("Listener for Audit"));
        assert!(rendered.contains("PostOrder :: Early"));
        assert!(rendered.contains("PostOrder :: Normal"));
        assert!(!rendered.contains("helper"));
    }

    #[test]
    fn test_priority_spellings() {
        let attr: Attribute = parse_quote!(#[subscribe(priority = PostOrder::Late)]);
        assert_eq!(parse_subscribe(&attr).unwrap(), "Late");

        let attr: Attribute = parse_quote!(#[subscribe(priority = "last")]);
        assert_eq!(parse_subscribe(&attr).unwrap(), "Last");

        let attr: Attribute = parse_quote!(#[subscribe(priority = FIRST)]);
        assert_eq!(parse_subscribe(&attr).unwrap(), "First");

        let attr: Attribute = parse_quote!(#[subscribe()]);
        assert_eq!(parse_subscribe(&attr).unwrap(), "Normal");
    }

    #[test]
    fn test_bad_subscribe_arguments() {
        let attr: Attribute = parse_quote!(#[subscribe(priority = Urgent)]);
        assert!(parse_subscribe(&attr).is_err());

        let attr: Attribute = parse_quote!(#[subscribe(order = Early)]);
        assert!(parse_subscribe(&attr).is_err());

        let attr: Attribute = parse_quote!(#[subscribe = "early"]);
        assert!(parse_subscribe(&attr).is_err());
    }

    #[test]
    fn test_private_handler_is_rejected() {
        let message = error_of(parse_quote! {
            impl Audit {
                #[subscribe]
                fn hidden(&self, event: &Ping) {}
            }
        });
        assert!(message.contains("must be `pub`"));
    }

    #[test]
    fn test_malformed_handlers_are_rejected() {
        let message = error_of(parse_quote! {
            impl Audit {
                #[subscribe]
                pub fn owned(&self, event: Ping) {}
            }
        });
        assert!(message.contains("shared reference"));

        let message = error_of(parse_quote! {
            impl Audit {
                #[subscribe]
                pub fn two(&self, a: &Ping, b: &Ping) {}
            }
        });
        assert!(message.contains("exactly one event"));

        let message = error_of(parse_quote! {
            impl Audit {
                #[subscribe]
                pub fn mutable(&mut self, event: &Ping) {}
            }
        });
        assert!(message.contains("`&self`"));
    }

    #[test]
    fn test_trait_impl_is_rejected() {
        let message = error_of(parse_quote! {
            impl Clone for Audit {
                fn clone(&self) -> Self { Audit }
            }
        });
        assert!(message.contains("inherent impl"));
    }
}
