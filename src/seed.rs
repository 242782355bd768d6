//! Sample movie dataset.
//!
//! Seeding goes through ordinary `create` intents, so every backend stores
//! the dataset in its own native layout and repeated loads converge.

use tracing::{debug, info};

use crate::backend::BackendKind;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::intent::Intent;
use crate::schema::MOVIES;

pub struct SampleMovie {
    pub title: &'static str,
    pub year: i64,
    pub genres: &'static [&'static str],
    pub directors: &'static [&'static str],
    pub cast: &'static [&'static str],
    pub rating: f64,
}

impl SampleMovie {
    pub fn to_intent(&self) -> Intent {
        Intent::create(MOVIES)
            .value("title", self.title)
            .value("year", self.year)
            .value("genre", self.genres.to_vec())
            .value("director", self.directors.to_vec())
            .value("cast", self.cast.to_vec())
            .value("rating", self.rating)
    }
}

pub const SAMPLE: [SampleMovie; 13] = [
    SampleMovie {
        title: "Jurassic Park",
        year: 1993,
        genres: &["Adventure", "Sci-Fi"],
        directors: &["Steven Spielberg"],
        cast: &["Sam Neill", "Laura Dern", "Jeff Goldblum"],
        rating: 8.2,
    },
    SampleMovie {
        title: "Schindler's List",
        year: 1993,
        genres: &["Biography", "Drama", "History"],
        directors: &["Steven Spielberg"],
        cast: &["Liam Neeson", "Ralph Fiennes", "Ben Kingsley"],
        rating: 9.0,
    },
    SampleMovie {
        title: "Hook",
        year: 1991,
        genres: &["Adventure", "Family", "Fantasy"],
        directors: &["Steven Spielberg"],
        cast: &["Dustin Hoffman", "Robin Williams", "Julia Roberts"],
        rating: 6.8,
    },
    SampleMovie {
        title: "Always",
        year: 1989,
        genres: &["Drama", "Fantasy", "Romance"],
        directors: &["Steven Spielberg"],
        cast: &["Richard Dreyfuss", "Holly Hunter", "John Goodman"],
        rating: 6.4,
    },
    SampleMovie {
        title: "Goodfellas",
        year: 1990,
        genres: &["Biography", "Crime", "Drama"],
        directors: &["Martin Scorsese"],
        cast: &["Robert De Niro", "Ray Liotta", "Joe Pesci"],
        rating: 8.7,
    },
    SampleMovie {
        title: "Home Alone",
        year: 1990,
        genres: &["Comedy", "Family"],
        directors: &["Chris Columbus"],
        cast: &["Macaulay Culkin", "Joe Pesci", "Daniel Stern"],
        rating: 7.7,
    },
    SampleMovie {
        title: "Ghost",
        year: 1990,
        genres: &["Drama", "Fantasy", "Romance"],
        directors: &["Jerry Zucker"],
        cast: &["Patrick Swayze", "Demi Moore", "Whoopi Goldberg"],
        rating: 7.1,
    },
    SampleMovie {
        title: "Dances with Wolves",
        year: 1990,
        genres: &["Adventure", "Drama", "Western"],
        directors: &["Kevin Costner"],
        cast: &["Kevin Costner", "Mary McDonnell", "Graham Greene"],
        rating: 8.0,
    },
    SampleMovie {
        title: "Total Recall",
        year: 1990,
        genres: &["Action", "Sci-Fi"],
        directors: &["Paul Verhoeven"],
        cast: &["Arnold Schwarzenegger", "Sharon Stone", "Rachel Ticotin"],
        rating: 7.5,
    },
    SampleMovie {
        title: "Saving Private Ryan",
        year: 1998,
        genres: &["Drama", "War"],
        directors: &["Steven Spielberg"],
        cast: &["Tom Hanks", "Matt Damon", "Tom Sizemore"],
        rating: 8.6,
    },
    SampleMovie {
        title: "The Dark Knight",
        year: 2008,
        genres: &["Action", "Crime", "Drama"],
        directors: &["Christopher Nolan"],
        cast: &["Christian Bale", "Heath Ledger", "Aaron Eckhart"],
        rating: 9.0,
    },
    SampleMovie {
        title: "Catch Me If You Can",
        year: 2002,
        genres: &["Biography", "Crime", "Drama"],
        directors: &["Steven Spielberg"],
        cast: &["Leonardo DiCaprio", "Tom Hanks", "Christopher Walken"],
        rating: 8.1,
    },
    SampleMovie {
        title: "Cast Away",
        year: 2000,
        genres: &["Adventure", "Drama"],
        directors: &["Robert Zemeckis"],
        cast: &["Tom Hanks", "Helen Hunt", "Paul Sanders"],
        rating: 7.8,
    },
];

/// Create intents for the whole sample.
pub fn intents() -> Vec<Intent> {
    SAMPLE.iter().map(SampleMovie::to_intent).collect()
}

/// Seed one backend. Stops at the first failed create.
pub async fn load(dispatcher: &Dispatcher, kind: BackendKind) -> EngineResult<usize> {
    let intents = intents();
    for intent in &intents {
        let envelope = dispatcher.dispatch(kind, intent).await;
        if envelope.is_error() {
            return Err(EngineError::execution(
                kind,
                format!(
                    "seeding failed: {}",
                    envelope.error_detail().unwrap_or("unknown error")
                ),
            ));
        }
        debug!(backend = %kind, intent = %intent, "seeded");
    }
    info!(backend = %kind, movies = intents.len(), "sample dataset loaded");
    Ok(intents.len())
}

/// Seed every registered backend.
pub async fn load_all(dispatcher: &Dispatcher) -> EngineResult<()> {
    for kind in dispatcher.backends() {
        load(dispatcher, kind).await?;
    }
    Ok(())
}
