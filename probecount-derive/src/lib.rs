use quote::quote;
use syn::{parse_macro_input, Fields, Item, LitStr};

/// Marks a type as a top-level event section. The argument is the section
/// name, used as its key in the JSON representation of an event.
#[proc_macro_attribute]
pub fn event_section(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let input: Item = parse_macro_input!(item);
    let ident = match input {
        Item::Struct(ref item) => item.ident.clone(),
        Item::Enum(ref item) => item.ident.clone(),
        _ => panic!("event sections must be enums or structs"),
    };

    let name: LitStr = syn::parse(args).expect("Invalid section name");

    let output = quote! {
        #[crate::event_type]
        #input

        impl #ident {
            pub const SECTION: &'static str = #name;
        }

        impl crate::EventSectionInternal for #ident {
            fn section(&self) -> &'static str {
                Self::SECTION
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn to_json(&self) -> serde_json::Value {
                serde_json::json!(self)
            }
        }
    };
    output.into()
}

struct EventTypeProps {
    enum_is_simple: bool,
    named_fields: bool,
}

fn item_get_props(item: &Item) -> EventTypeProps {
    match item {
        Item::Struct(item) => EventTypeProps {
            enum_is_simple: false,
            named_fields: matches!(&item.fields, Fields::Named(_)),
        },
        Item::Enum(item) => EventTypeProps {
            enum_is_simple: item.variants.iter().all(|v| v.fields == Fields::Unit),
            named_fields: false,
        },
        _ => panic!("event types must be enums or structs"),
    }
}

/// Adds the derives every type embedded in an event needs. Simple enums also
/// get a lowercase serde representation and equality.
#[proc_macro_attribute]
pub fn event_type(
    _args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let input: Item = parse_macro_input!(item);
    let props = item_get_props(&input);
    // Attribute macros must run before the derives, serde helpers after.
    let mut pre_attrs = Vec::new();
    let mut post_attrs = Vec::new();
    let mut derives = vec![
        quote!(Clone),
        quote!(Debug),
        quote!(serde::Serialize),
        quote!(serde::Deserialize),
    ];

    if props.enum_is_simple {
        derives.push(quote!(PartialEq));
        derives.push(quote!(Eq));
        post_attrs.push(quote!(#[serde(rename_all = "lowercase")]));
    } else if props.named_fields {
        pre_attrs.push(quote!(#[serde_with::skip_serializing_none]));
    }

    let output = quote! {
        #(#pre_attrs)*
        #[derive(#(#derives),*)]
        #(#post_attrs)*
        #input
    };
    output.into()
}
