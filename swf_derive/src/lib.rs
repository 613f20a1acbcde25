use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input, spanned::Spanned};

/// 为带有 `id` 字段的定义结构体实现 `Definition`
#[proc_macro_derive(Definition)]
pub fn definition_derive(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let expanded = match impl_definition(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    };

    proc_macro::TokenStream::from(expanded)
}

fn impl_definition(ast: &DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    // 只支持具名字段，并且必须存在 `id`
    let has_id = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields
                .named
                .iter()
                .any(|field| field.ident.as_ref().is_some_and(|ident| ident == "id")),
            _ => false,
        },
        _ => false,
    };
    if !has_id {
        return Err(syn::Error::new(
            ast.span(),
            "#[derive(Definition)] requires a struct with a named `id` field",
        ));
    }

    let gen_code = quote! {
        impl #impl_generics Definition for #name #ty_generics #where_clause {
            fn id(&self) -> swf::CharacterId {
                self.id
            }
        }
    };

    Ok(gen_code)
}
