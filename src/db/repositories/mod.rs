mod jobs;
mod pauses;
mod sessions;
