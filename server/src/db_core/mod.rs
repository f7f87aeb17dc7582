pub mod prelude {
    pub use entity::device;
    pub use entity::prelude::Device as DeviceEntity;
    pub use sea_orm::entity::prelude::*;
    pub use sea_orm::sea_query::Expr;
}
