//! Catalogue page extraction: reader interfaces and layout implementations.

pub mod readers;

pub use readers::{
    ArtistIndexReader, ArtistPageReader, CatalogArtistPageReader, JazzIndexReader, RatingsPageReader,
    RatingsReader, ReadError, RockIndexReader, VolumeIndexReader,
};
