mod common;
mod invalidation;
mod reporter;
