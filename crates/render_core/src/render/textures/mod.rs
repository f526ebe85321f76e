//! Texture unit management

pub mod unit_allocator;

pub use unit_allocator::{
    TextureUnitAllocator, TextureUnitContext, TextureUnitError, TextureUnitResult,
};
