use crate::models::{
    BucketQuery, BucketSpec, SeedTitle, INDIE_SOURCE, NEW_RELEASES_SOURCE, POPULAR_SOURCE,
    STAFF_PICKS_SOURCE, TOP_RATED_SOURCE,
};

/// TMDb keyword for independent film
const INDIE_KEYWORD_ID: u32 = 10183;

/// Genre buckets as (bucket name, TMDb genre id)
const GENRE_BUCKETS: &[(&str, u32)] = &[
    ("Action", 28),
    ("Comedy", 35),
    ("Drama", 18),
    ("Horror", 27),
    ("Science Fiction", 878),
    ("Thriller", 53),
    ("Romance", 10749),
    ("Animation", 16),
    ("Crime", 80),
    ("Documentary", 99),
];

/// The buckets a catalogue build resolves, in provenance priority order.
///
/// Duplicates keep the first bucket they appear in, so the narrow provenance
/// buckets come before the broad lists.
pub fn default_buckets(seeds: Vec<SeedTitle>) -> Vec<BucketSpec> {
    let mut buckets = Vec::new();

    if !seeds.is_empty() {
        buckets.push(
            BucketSpec::new(STAFF_PICKS_SOURCE, BucketQuery::SeedsOnly).with_seeds(seeds),
        );
    }

    buckets.push(BucketSpec::new(NEW_RELEASES_SOURCE, BucketQuery::NowPlaying));
    buckets.push(BucketSpec::new(
        INDIE_SOURCE,
        BucketQuery::Keyword {
            keyword_id: INDIE_KEYWORD_ID,
        },
    ));
    buckets.push(BucketSpec::new(TOP_RATED_SOURCE, BucketQuery::TopRated));
    buckets.push(BucketSpec::new(POPULAR_SOURCE, BucketQuery::Popular));

    buckets.extend(
        GENRE_BUCKETS
            .iter()
            .map(|(name, genre_id)| {
                BucketSpec::new(name, BucketQuery::Genre { genre_id: *genre_id })
            }),
    );

    buckets
}

/// Secondary strategy when every primary bucket comes back empty
pub fn fallback_buckets() -> Vec<BucketSpec> {
    vec![
        BucketSpec::new(
            POPULAR_SOURCE,
            BucketQuery::Discover {
                sort_by: "popularity.desc".to_string(),
                min_votes: 1000,
            },
        ),
        BucketSpec::new(
            TOP_RATED_SOURCE,
            BucketQuery::Discover {
                sort_by: "vote_average.desc".to_string(),
                min_votes: 5000,
            },
        ),
    ]
}
