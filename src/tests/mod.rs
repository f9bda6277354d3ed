mod test_loop_wraparound;
mod test_tick_idempotence;
