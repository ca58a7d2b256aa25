use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn, ReturnType};

/// Wraps a function body in `rill::runtime::run`, unwrapping its result.
///
/// The body is evaluated as a single expression producing the `Effect` to
/// run, the same way the teacher's own `#[start]` evaluates its body as the
/// closure handed to `runtime::start` -- so the annotated function itself
/// declares no return type:
///
/// ```ignore
/// #[rill::main]
/// fn main() {
///     rill::effect::now(1)
/// }
/// ```
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);

    let attributes = &item.attrs;
    let visibility = &item.vis;
    let mut signature = item.sig;
    signature.output = ReturnType::Default;
    let body = &item.block;

    let result = quote! {
        #(#attributes)*
        #visibility #signature {
            ::rill::runtime::run(#body).unwrap();
        }
    };

    result.into()
}
