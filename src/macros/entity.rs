/// Implement [`Entity`](crate::entity::Entity) for a struct with `id: String`
/// and `modified_on: Option<DateTime<Utc>>` fields.
///
/// The type name becomes the name used in relationship collections, so it is
/// taken as a bare identifier.
///
/// # Example
/// ```ignore
/// lifelink_entity!(Book, "books");
/// lifelink_entity!(Cover, "covers", file);
/// ```
#[macro_export]
macro_rules! lifelink_entity {
    (@impl $ty:ident, $collection:expr, $kind:expr) => {
        impl $crate::entity::Entity for $ty {
            const NAME: &'static str = stringify!($ty);
            const COLLECTION: &'static str = $collection;
            const KIND: $crate::entity::EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn modified_on(&self) -> Option<$crate::chrono::DateTime<$crate::chrono::Utc>> {
                self.modified_on
            }

            fn set_modified_on(&mut self, at: $crate::chrono::DateTime<$crate::chrono::Utc>) {
                self.modified_on = Some(at);
            }
        }
    };
    ($ty:ident, $collection:expr, file) => {
        $crate::lifelink_entity!(@impl $ty, $collection, $crate::entity::EntityKind::File);
    };
    ($ty:ident, $collection:expr) => {
        $crate::lifelink_entity!(@impl $ty, $collection, $crate::entity::EntityKind::Document);
    };
}
