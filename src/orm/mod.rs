pub mod auto_creator_processed;
pub mod automation_settings;
pub mod categories;
pub mod comments;
pub mod favorites;
pub mod job_logs;
pub mod keyword_search_history;
pub mod keywords;
pub mod like_counts;
pub mod likes;
pub mod ng_words;
pub mod notification_reads;
pub mod point_settings;
pub mod points;
pub mod post_keywords;
pub mod posts;
pub mod users;
pub mod vote_choices;
pub mod vote_history;
pub mod vote_options;
pub mod workers;
