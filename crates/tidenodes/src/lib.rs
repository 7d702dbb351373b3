//! Standard operator catalog
//!
//! Literal sources, structures, elements, bindings and nested programs.

mod binding;
mod collection;
mod constant;
mod element;
mod list;
mod program;

pub use binding::{Binding, BindingModel};
pub use collection::{Collection, CollectionModel};
pub use constant::{ConstantModel, LocalModel};
pub use element::{Element, ElementModel};
pub use list::{List, ListModel};
pub use program::{InlineModel, ProgramModel};
use tideruntime::Catalog;

use std::sync::Arc;

/// Register all standard operators with a catalog
pub fn register_all(catalog: &mut Catalog) {
    catalog.register(Arc::new(ConstantModel));
    catalog.register(Arc::new(LocalModel));
    catalog.register(Arc::new(ListModel));
    catalog.register(Arc::new(CollectionModel));
    catalog.register(Arc::new(ElementModel));
    catalog.register(Arc::new(BindingModel));
    catalog.register(Arc::new(ProgramModel::program()));
    catalog.register(Arc::new(ProgramModel::component()));
    catalog.register(Arc::new(InlineModel));
}

/// A catalog holding every standard operator
pub fn standard_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    register_all(&mut catalog);
    catalog
}
