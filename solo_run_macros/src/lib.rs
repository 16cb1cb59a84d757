use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, parse_macro_input};

#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    // Ensure the function is async
    if input.sig.asyncness.is_none() {
        return quote! { compile_error!("The #[solo_run::main] function must be async"); }.into();
    }

    if name != "main" {
        return quote! {
            compile_error!("#[solo_run::main] can only be applied to the 'main' function");
        }
        .into();
    }

    if input.sig.inputs.len() > 1 {
        return quote! {
            compile_error!("#[solo_run::main] takes at most one argument, the runtime handle");
        }
        .into();
    }

    // Optional argument: bound to the runtime's handle before the body runs.
    let handle_binding = match input.sig.inputs.first() {
        Some(FnArg::Typed(arg)) => {
            let pat = &arg.pat;
            quote! { let #pat = runtime.handle(); }
        }
        Some(FnArg::Receiver(_)) => {
            return quote! {
                compile_error!("#[solo_run::main] cannot be applied to a method");
            }
            .into();
        }
        None => quote! {},
    };

    let result = quote! {
        #(#attrs)*
        #vis fn main() {
            // 1. Bootstrap the Runtime
            let mut runtime = solo_run::runtime::Runtime::new(false)
                .expect("Failed to initialize runtime");
            #handle_binding

            // 2. Block on the user's main body
            if let Err(err) = runtime.block_on(async move {
                #body
            }) {
                eprintln!("solo_run: {err}");
                std::process::exit(1);
            }

            // The program only reaches this point once the runtime is quiescent.
        }
    };
    result.into()
}
