/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![forbid(unsafe_code)]

//! Postline Macro Library
//!
//! Procedural macros for declaring payload types that travel between
//! components. Payloads are copied byte-for-byte into a shared buffer, so every
//! payload type needs a fixed, padding-free layout.
//!
//! ```ignore
//! use postline::prelude::*;
//!
//! #[postline_message]
//! pub struct Position {
//!     pub x: i32,
//!     pub y: i32,
//! }
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.segments.last().is_some_and(|s| s.ident == trait_name) {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

fn has_repr(input: &DeriveInput) -> bool {
    input.attrs.iter().any(|attr| attr.path().is_ident("repr"))
}

/// Turns a struct into a fixed-layout payload type.
///
/// Expands to:
/// - `#[repr(C)]` when the struct declares no `repr` of its own
/// - `#[derive(Clone, Copy, Debug)]` (only the ones not already present)
/// - `zerocopy`'s `IntoBytes`, `FromBytes`, `Immutable` and `KnownLayout` derives
/// - a compile-time assertion that the type is `Send + Sync + 'static`
///
/// The crate using the macro needs `zerocopy` as a dependency. Structs with
/// implicit padding are rejected by the `IntoBytes` derive; order fields from
/// widest to narrowest or add explicit padding fields.
///
/// ```ignore
/// #[postline_message]
/// pub struct SetSpeed {
///     pub left: i16,
///     pub right: i16,
/// }
/// ```
#[proc_macro_attribute]
pub fn postline_message(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);

    if !matches!(input.data, Data::Struct(_)) {
        return syn::Error::new_spanned(
            &input.ident,
            "postline_message can only be applied to structs",
        )
        .to_compile_error()
        .into();
    }

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let repr = if has_repr(&input) {
        quote!()
    } else {
        quote!(#[repr(C)])
    };

    let derives = {
        let mut traits = Vec::new();
        for std_trait in ["Clone", "Copy", "Debug"] {
            if !has_derive(&input, std_trait) {
                let ident = quote::format_ident!("{}", std_trait);
                traits.push(quote!(#ident));
            }
        }
        for layout_trait in ["IntoBytes", "FromBytes", "Immutable", "KnownLayout"] {
            if !has_derive(&input, layout_trait) {
                let ident = quote::format_ident!("{}", layout_trait);
                traits.push(quote!(::zerocopy::#ident));
            }
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let assert_ident = quote::format_ident!("_AssertPostlineMessage_{}", name);

    let expanded = quote! {
        #repr
        #derives
        #input

        #[doc(hidden)]
        #[allow(dead_code, non_camel_case_types, non_snake_case, clippy::needless_lifetimes)]
        const _: () = {
            fn #assert_ident #impl_generics () #where_clause {
                fn assert_bounds<T: Send + Sync + 'static>() {}
                assert_bounds::<#name #ty_generics>();
            }
        };
    };

    TokenStream::from(expanded)
}
