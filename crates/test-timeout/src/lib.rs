//! Test attributes that fail a test outright when it runs past a wall-clock
//! budget, instead of letting a wedged test hang the whole suite.
//!
//! `#[test_timeout::timeout]` wraps a synchronous test;
//! `#[test_timeout::tokio_timeout_test]` wraps an async test in a
//! current-thread Tokio runtime. Both accept an optional seconds literal:
//! `#[test_timeout::timeout(10)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let func = parse_macro_input!(item as ItemFn);

    if func.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "timeout expects a synchronous test; use tokio_timeout_test for async tests",
        )
        .to_compile_error()
        .into();
    }

    let body = func.block;
    expand(func.attrs, func.vis, func.sig, secs, quote!( #body ))
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut func = parse_macro_input!(item as ItemFn);

    if func.sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let body = func.block;
    let driver = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(#secs), async move #body)
                .await
                .expect("test timed out");
        });
    };
    expand(func.attrs, func.vis, func.sig, secs, driver)
}

/// Wrap `body` in a watchdog: run it on a helper thread and panic if it does
/// not report back within the budget. Shared by both attributes.
fn expand(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    secs: u64,
    body: TokenStream2,
) -> TokenStream {
    let kept_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_entry_attribute(attr))
        .collect();

    TokenStream::from(quote! {
        #[test]
        #(#kept_attrs)*
        #vis #sig {
            let budget = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(budget) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {}s", #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited before reporting a result")
                }
            }
        }
    })
}

fn parse_timeout_secs(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(
            lit,
            "timeout must be greater than zero",
        ));
    }
    Ok(secs)
}

/// `#[test]` and `#[tokio::test]` are replaced by the expansion; anything
/// else (`#[ignore]`, cfg attributes) is kept.
fn is_test_entry_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(segments.as_slice(), [single] if single == "test")
        || matches!(segments.as_slice(), [first, second] if first == "tokio" && second == "test")
}
