use super::{is_unique_violation, Member, Membership, Repository, Role, Room};

impl Repository {
    pub async fn create_room(&self, room: &Room, members: &[(String, Role)]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO room (id, name, is_group, is_private, image_url, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(room.is_group)
        .bind(room.is_private)
        .bind(&room.image_url)
        .bind(&room.created_by)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await?;

        for (user_id, role) in members {
            let added_by = (user_id != &room.created_by).then_some(&room.created_by);
            sqlx::query(
                "INSERT INTO membership (room_id, user_id, role, joined_at, join_approved, added_by)
                 VALUES (?, ?, ?, ?, 1, ?)",
            )
            .bind(&room.id)
            .bind(user_id)
            .bind(role)
            .bind(room.created_at)
            .bind(added_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    pub async fn get_room(&self, id: &str) -> Result<Option<Room>, sqlx::Error> {
        sqlx::query_as::<_, Room>("SELECT * FROM room WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn archive_room(&self, id: &str, now: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE room SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_room_image(&self, id: &str, image_url: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE room SET image_url = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(image_url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn active_room_ids(&self, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT room_id FROM membership
             WHERE user_id = ? AND leave_at IS NULL AND join_approved = 1
             ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Archived rooms the user belonged to, and rooms the user left or was
    /// removed from and has not rejoined.
    pub async fn deactivated_rooms(&self, user_id: &str) -> Result<Vec<Room>, sqlx::Error> {
        sqlx::query_as::<_, Room>(
            "SELECT r.* FROM room r
             WHERE EXISTS (
                 SELECT 1 FROM membership m
                 WHERE m.room_id = r.id AND m.user_id = ?1 AND m.join_approved = 1
             )
             AND (
                 r.deleted_at IS NOT NULL
                 OR NOT EXISTS (
                     SELECT 1 FROM membership a
                     WHERE a.room_id = r.id AND a.user_id = ?1 AND a.leave_at IS NULL
                 )
             )
             ORDER BY COALESCE(r.deleted_at, r.created_at) DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn active_member_count(&self, room_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM membership WHERE room_id = ? AND leave_at IS NULL")
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn active_membership(&self, room_id: &str, user_id: &str) -> Result<Option<Membership>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM membership WHERE room_id = ? AND user_id = ? AND leave_at IS NULL",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn latest_membership(&self, room_id: &str, user_id: &str) -> Result<Option<Membership>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM membership WHERE room_id = ? AND user_id = ? AND join_approved = 1
             ORDER BY id DESC LIMIT 1",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Creates a membership. Returns false when the user already holds an
    /// active one in this room.
    pub async fn insert_membership(
        &self,
        room_id: &str,
        user_id: &str,
        role: Role,
        join_approved: bool,
        added_by: Option<&str>,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO membership (room_id, user_id, role, joined_at, join_approved, added_by)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role)
        .bind(now)
        .bind(join_approved)
        .bind(added_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Adds every user as a member, or none of them. Returns false if any
    /// of them already holds an active membership.
    pub async fn insert_memberships(
        &self,
        room_id: &str,
        user_ids: &[String],
        added_by: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for user_id in user_ids {
            let result = sqlx::query(
                "INSERT INTO membership (room_id, user_id, role, joined_at, join_approved, added_by)
                 VALUES (?, ?, ?, ?, 1, ?)",
            )
            .bind(room_id)
            .bind(user_id)
            .bind(Role::Member)
            .bind(now)
            .bind(added_by)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await?;
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn approve_membership(&self, room_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE membership SET join_approved = 1
             WHERE room_id = ? AND user_id = ? AND leave_at IS NULL AND join_approved = 0",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_pending_membership(&self, room_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM membership
             WHERE room_id = ? AND user_id = ? AND leave_at IS NULL AND join_approved = 0",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn end_membership(&self, room_id: &str, user_id: &str, now: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE membership SET leave_at = ?
             WHERE room_id = ? AND user_id = ? AND leave_at IS NULL AND join_approved = 1",
        )
        .bind(now)
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Ends every listed membership, or none. Returns false if any of the
    /// users was not an active member.
    pub async fn end_memberships(
        &self,
        room_id: &str,
        user_ids: &[String],
        removed_by: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for user_id in user_ids {
            let result = sqlx::query(
                "UPDATE membership SET leave_at = ?, removed_by = ?
                 WHERE room_id = ? AND user_id = ? AND leave_at IS NULL AND join_approved = 1",
            )
            .bind(now)
            .bind(removed_by)
            .bind(room_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Moves an active member from `from` to `to`. Returns false if the
    /// member does not currently hold `from`.
    pub async fn change_role(
        &self,
        room_id: &str,
        user_id: &str,
        from: Role,
        to: Role,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE membership SET role = ?
             WHERE room_id = ? AND user_id = ? AND role = ?
               AND leave_at IS NULL AND join_approved = 1",
        )
        .bind(to)
        .bind(room_id)
        .bind(user_id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn members(&self, room_id: &str) -> Result<Vec<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(
            "SELECT m.user_id, u.name, u.image_url, u.is_online, m.role, m.joined_at
             FROM membership m JOIN users u ON u.id = m.user_id
             WHERE m.room_id = ? AND m.leave_at IS NULL AND m.join_approved = 1
             ORDER BY m.id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn pending_requests(&self, room_id: &str) -> Result<Vec<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(
            "SELECT m.user_id, u.name, u.image_url, u.is_online, m.role, m.joined_at
             FROM membership m JOIN users u ON u.id = m.user_id
             WHERE m.room_id = ? AND m.leave_at IS NULL AND m.join_approved = 0
             ORDER BY m.id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn admin_ids(&self, room_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM membership
             WHERE room_id = ? AND role = 'admin' AND leave_at IS NULL AND join_approved = 1",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_millis;

    async fn seeded() -> Repository {
        let repo = Repository::in_memory().await.unwrap();
        for (id, name) in [("a", "Ann"), ("b", "Bob"), ("c", "Cid")] {
            repo.upsert_user(id, name, None).await.unwrap();
        }
        let room = Room {
            id: "r".into(),
            name: Some("Team".into()),
            is_group: true,
            is_private: false,
            image_url: None,
            created_by: "a".into(),
            created_at: now_millis(),
            deleted_at: None,
        };
        repo.create_room(&room, &[("a".into(), Role::Admin), ("b".into(), Role::Member)])
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn second_active_membership_is_refused() {
        let repo = seeded().await;
        let inserted = repo
            .insert_membership("r", "b", Role::Member, true, None, now_millis())
            .await
            .unwrap();
        assert!(!inserted);
    }

    #[tokio::test]
    async fn rejoin_keeps_history() {
        let repo = seeded().await;
        assert!(repo.end_membership("r", "b", now_millis()).await.unwrap());
        assert!(!repo.end_membership("r", "b", now_millis()).await.unwrap());
        assert!(repo
            .insert_membership("r", "b", Role::Member, true, None, now_millis())
            .await
            .unwrap());

        let (rows,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM membership WHERE room_id = 'r' AND user_id = 'b'")
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(repo.active_member_count("r").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bulk_insert_is_all_or_nothing() {
        let repo = seeded().await;
        let added = repo
            .insert_memberships("r", &["c".into(), "b".into()], "a", now_millis())
            .await
            .unwrap();
        assert!(!added);
        assert!(repo.active_membership("r", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn role_change_is_conditional() {
        let repo = seeded().await;
        assert!(!repo.change_role("r", "a", Role::Member, Role::Admin).await.unwrap());
        assert!(repo.change_role("r", "b", Role::Member, Role::Admin).await.unwrap());
        let mut admins = repo.admin_ids("r").await.unwrap();
        admins.sort();
        assert_eq!(admins, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn archive_happens_once() {
        let repo = seeded().await;
        assert!(repo.archive_room("r", now_millis()).await.unwrap());
        assert!(!repo.archive_room("r", now_millis()).await.unwrap());
        assert!(repo.get_room("r").await.unwrap().unwrap().is_archived());
    }
}
