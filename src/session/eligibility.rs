use crate::models::{DocumentKind, DocumentMetadata, UserIdentity};

/// Why a document does not get a collaboration session. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    MissingMetadata,
    MissingUser,
    UnsupportedKind(DocumentKind),
}

/// Metadata present, user present, and a kind the session is configured for
pub fn check<'a>(
    metadata: Option<&'a DocumentMetadata>,
    user: Option<&'a UserIdentity>,
    collaborative_kinds: &[DocumentKind],
) -> Result<(&'a DocumentMetadata, &'a UserIdentity), Ineligible> {
    let metadata = metadata.ok_or(Ineligible::MissingMetadata)?;
    let user = user.ok_or(Ineligible::MissingUser)?;
    if !collaborative_kinds.contains(&metadata.kind) {
        return Err(Ineligible::UnsupportedKind(metadata.kind));
    }
    Ok((metadata, user))
}
