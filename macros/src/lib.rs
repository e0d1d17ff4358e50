use proc_macro::TokenStream;
use quote::quote;

/// Implements `LogLine` for a record persisted one-per-line in a session's
/// log or snapshot file: `to_line`/`from_line` around `serde_json`.
///
/// Requires: `Serialize + for<'de> Deserialize<'de>`
#[proc_macro_derive(LogLine)]
pub fn log_line_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    impl_log_line(&ast)
}

fn impl_log_line(ast: &syn::DeriveInput) -> TokenStream {
    let name = &ast.ident;
    let gen = quote! {
        impl crate::store::LogLine for #name {
            fn to_line(&self) -> Result<String, serde_json::Error> {
                serde_json::to_string(self)
            }

            fn from_line(line: &str) -> Result<#name, serde_json::Error> {
                serde_json::from_str(line)
            }
        }
    };
    gen.into()
}
