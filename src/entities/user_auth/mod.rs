pub mod advertiser_profile_entity;
pub mod local_user_entity;
