//! # Scaffold Block Derive Macros
//!
//! This crate provides the procedural macros for `scaffold-block`. `#[derive(BlockObject)]`
//! implements `BlockLayout`, `BlockSerialize` and `FromBlock` for a struct, writing and
//! reading its fields back to back in declaration order.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input};

/// Derives `BlockLayout`, `BlockSerialize` and `FromBlock`.
///
/// # Attributes
///
/// * `#[block(raw)]` on the struct: copy the value with its host layout. The struct must
///   implement `bytemuck::Pod`.
/// * `#[block(read_only)]` on the struct: skip `BlockSerialize`. Use it for view types with
///   `Offset<T>` fields that mirror the layout of a serializable struct.
/// * `#[block(buffer = "vertex")]` / `#[block(buffer = "index")]` on a `Vec<T>` field: tag the
///   sub-block as GPU vertex or index data instead of a plain vector.
#[proc_macro_derive(BlockObject, attributes(block))]
pub fn derive_block_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(ds) => ds,
        _ => {
            return syn::Error::new(name.span(), "BlockObject only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let options = match parse_struct_attributes(&input.attrs) {
        Ok(options) => options,
        Err(e) => return e.to_compile_error().into(),
    };

    if options.is_raw {
        return TokenStream::from(generate_raw(&input));
    }

    let mut fields = Vec::new();
    for (index, field) in data_struct.fields.iter().enumerate() {
        let buffer = match parse_field_attributes(&field.attrs) {
            Ok(buffer) => buffer,
            Err(e) => return e.to_compile_error().into(),
        };
        let member = match &field.ident {
            Some(ident) => syn::Member::Named(ident.clone()),
            None => syn::Member::Unnamed(syn::Index::from(index)),
        };
        fields.push(BlockField {
            member,
            ty: field.ty.clone(),
            buffer,
        });
    }

    let impl_layout = generate_layout(&input, &fields);
    let impl_serialize = if options.is_read_only {
        quote! {}
    } else {
        generate_serialize(&input, &fields)
    };
    let impl_read = generate_from_block(&input, &data_struct.fields, &fields);

    let expanded = quote! {
        #impl_layout
        #impl_serialize
        #impl_read
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct StructOptions {
    is_raw: bool,
    is_read_only: bool,
}

struct BlockField {
    member: syn::Member,
    ty: syn::Type,
    buffer: Option<BufferKind>,
}

#[derive(Clone, Copy)]
enum BufferKind {
    Vertex,
    Index,
}

fn parse_struct_attributes(attrs: &[Attribute]) -> syn::Result<StructOptions> {
    let mut options = StructOptions::default();
    for attr in attrs {
        if attr.path().is_ident("block") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("raw") {
                    options.is_raw = true;
                    return Ok(());
                }
                if meta.path.is_ident("read_only") {
                    options.is_read_only = true;
                    return Ok(());
                }
                Err(meta.error("Unknown block attribute on struct. Supported: raw, read_only"))
            })?;
        }
    }
    Ok(options)
}

fn parse_field_attributes(attrs: &[Attribute]) -> syn::Result<Option<BufferKind>> {
    let mut buffer = None;
    for attr in attrs {
        if attr.path().is_ident("block") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("buffer") {
                    let value = meta.value()?;
                    let s: LitStr = value.parse()?;
                    buffer = match s.value().to_lowercase().as_str() {
                        "vertex" => Some(BufferKind::Vertex),
                        "index" => Some(BufferKind::Index),
                        _ => return Err(meta.error("Unknown buffer kind. Supported: vertex, index")),
                    };
                    return Ok(());
                }
                Err(meta.error("Unknown block attribute on field. Supported: buffer"))
            })?;
        }
    }
    Ok(buffer)
}

// --- Generator: raw structs ---

fn generate_raw(input: &DeriveInput) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics scaffold_block::BlockLayout for #name #ty_generics #where_clause {
            const BLOCK_ALIGN: usize = ::std::mem::align_of::<Self>();
        }

        impl #impl_generics scaffold_block::BlockSerialize for #name #ty_generics #where_clause {
            fn serialize(&self, serializer: &mut scaffold_block::BlockSerializer) {
                serializer.serialize_raw(self);
            }

            fn serialize_slice(
                items: &[Self],
                serializer: &mut scaffold_block::BlockSerializer,
                special_buffer: scaffold_block::SpecialBuffer,
            ) {
                serializer.serialize_raw_sub_block(
                    scaffold_block::internal::bytemuck::cast_slice(items),
                    special_buffer,
                );
            }
        }

        impl #impl_generics scaffold_block::FromBlock for #name #ty_generics #where_clause {
            fn read_from(cursor: &mut scaffold_block::BlockCursor<'_>) -> scaffold_block::Result<Self> {
                cursor.read_pod()
            }

            fn read_slice(
                cursor: &mut scaffold_block::BlockCursor<'_>,
                count: usize,
            ) -> scaffold_block::Result<Vec<Self>> {
                cursor.read_pod_slice(count)
            }
        }
    }
}

// --- Generator: BlockLayout ---

fn generate_layout(input: &DeriveInput, fields: &[BlockField]) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let widen = fields.iter().map(|f| {
        let ty = &f.ty;
        quote! {
            if <#ty as scaffold_block::BlockLayout>::BLOCK_ALIGN > align {
                align = <#ty as scaffold_block::BlockLayout>::BLOCK_ALIGN;
            }
        }
    });

    quote! {
        impl #impl_generics scaffold_block::BlockLayout for #name #ty_generics #where_clause {
            const BLOCK_ALIGN: usize = {
                let mut align = 1usize;
                #(#widen)*
                align
            };
        }
    }
}

// --- Generator: BlockSerialize ---

fn generate_serialize(input: &DeriveInput, fields: &[BlockField]) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let statements = fields.iter().map(|f| {
        let member = &f.member;
        match f.buffer {
            Some(kind) => {
                let tag = match kind {
                    BufferKind::Vertex => format_ident!("VertexBuffer"),
                    BufferKind::Index => format_ident!("IndexBuffer"),
                };
                quote! {
                    scaffold_block::internal::serialize_tagged_sequence(
                        &self.#member,
                        scaffold_block::SpecialBuffer::#tag,
                        serializer,
                    );
                }
            }
            None => quote! {
                scaffold_block::BlockSerialize::serialize(&self.#member, serializer);
            },
        }
    });

    quote! {
        impl #impl_generics scaffold_block::BlockSerialize for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn serialize(&self, serializer: &mut scaffold_block::BlockSerializer) {
                #(#statements)*
            }
        }
    }
}

// --- Generator: FromBlock ---

fn generate_from_block(
    input: &DeriveInput,
    shape: &Fields,
    fields: &[BlockField],
) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let reads = fields.iter().map(|f| {
        let ty = &f.ty;
        quote! { <#ty as scaffold_block::FromBlock>::read_from(cursor)? }
    });

    let construct = match shape {
        Fields::Named(_) => {
            let members = fields.iter().map(|f| &f.member);
            quote! { Self { #(#members: #reads),* } }
        }
        Fields::Unnamed(_) => quote! { Self(#(#reads),*) },
        Fields::Unit => quote! { Self },
    };

    quote! {
        impl #impl_generics scaffold_block::FromBlock for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn read_from(cursor: &mut scaffold_block::BlockCursor<'_>) -> scaffold_block::Result<Self> {
                Ok(#construct)
            }
        }
    }
}
