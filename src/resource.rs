use serde::{Serialize, de::DeserializeOwned};

/// A business record exposed through REST actions.
///
/// The identity is absent before the first persist and stable afterwards. Its presence is
/// the only signal used to choose between create and update on an idempotent PUT.
///
/// Fields are read and written through the type's serde representation, so the serialized
/// field names are the ones used for forms, filters and ordering.
pub trait RestResource:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Short type name, e.g. `"Widget"`.
    const SHORT_NAME: &'static str;

    /// Serialized name of the identity field.
    const ID_FIELD: &'static str = "id";

    /// Fields a submitted form may bind. Empty means every field except the identity.
    const FORM_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> Option<i64>;

    /// Called by stores that generate identities. Never called on an entity that already
    /// has one.
    fn assign_id(&mut self, id: i64);

    /// Lower-cased short name, used for event names, routes and response keys.
    #[must_use]
    fn var_name() -> String {
        Self::SHORT_NAME.to_lowercase()
    }
}
